use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands::{run_check, run_history, run_inspect, run_new};

#[derive(Debug, Parser)]
#[command(
    name = "trackweave",
    about = "Inspect, check and edit trackweave timeline projects",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create an empty project file.
    New(NewArgs),

    /// Print tracks, clips, overlaps and groups of a project.
    Inspect(InspectArgs),

    /// Load a project and report every invariant violation.
    Check(CheckArgs),

    /// Apply an edit script and print the resulting undo history.
    History(HistoryArgs),
}

#[derive(Debug, Args)]
pub struct NewArgs {
    pub name: String,

    /// One of 1080p25, 1080p30, 720p, 4k, shorts.
    #[arg(long, default_value = "1080p25")]
    pub preset: String,

    /// Track kinds to create, bottom first.
    #[arg(long, value_delimiter = ',', default_value = "video,audio")]
    pub tracks: Vec<String>,

    /// Defaults to `<name>.twproj` in the current directory.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    pub project: PathBuf,

    /// Dump the timeline document as JSON instead.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    pub project: PathBuf,

    /// Edit configuration (JSON) used when opening the timeline.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Fail on load warnings too.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub project: PathBuf,

    /// JSON array of edit operations.
    #[arg(long)]
    pub script: PathBuf,

    /// Write the edited timeline back to the project.
    #[arg(long)]
    pub save: bool,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::New(args) => run_new(args).map(|path| println!("{}", path.display())),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Check(args) => run_check(args),
        Commands::History(args) => run_history(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn new_parses_track_list() {
        let cli = Cli::parse_from(["trackweave", "new", "demo", "--tracks", "video,video,text"]);
        let Commands::New(args) = cli.command else {
            panic!("expected new");
        };
        assert_eq!(args.tracks, vec!["video", "video", "text"]);
        assert_eq!(args.preset, "1080p25");
    }
}
