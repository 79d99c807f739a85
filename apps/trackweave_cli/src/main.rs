mod cli;
mod commands;
mod script;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = cli::run_from_env() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
