use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use trackweave_core::project::{self, Severity};
use trackweave_core::{EditConfig, Project, Timeline, TrackKind};

use crate::cli::{CheckArgs, HistoryArgs, InspectArgs, NewArgs};
use crate::script;

fn parse_track_kind(name: &str) -> Result<TrackKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "video" | "v" => Ok(TrackKind::Video),
        "audio" | "a" => Ok(TrackKind::Audio),
        "text" | "t" => Ok(TrackKind::Text),
        other => bail!("unknown track kind '{other}'"),
    }
}

fn open(path: &Path, config: EditConfig) -> Result<(Project, Timeline, project::LoadReport)> {
    let project = Project::load_from_file(path)
        .with_context(|| format!("cannot read project {}", path.display()))?;
    let (timeline, report) = project.open_timeline(config);
    Ok((project, timeline, report))
}

pub fn run_new(args: NewArgs) -> Result<PathBuf> {
    let settings = project::preset(&args.preset)
        .ok_or_else(|| anyhow!("unknown preset '{}'", args.preset))?;
    let mut timeline = Timeline::new(settings.frame_rate);
    for kind in &args.tracks {
        timeline.new_track(parse_track_kind(kind)?, None);
    }
    timeline.commit("Create tracks");

    let mut project = Project::new(&args.name, settings);
    project.store_timeline(&timeline)?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}.twproj", args.name)));
    let path = project.save_to_file(&output)?;
    tracing::info!(path = %path.display(), tracks = args.tracks.len(), "project created");
    Ok(path)
}

pub fn render_summary(project: &Project, timeline: &Timeline) -> String {
    let mut out = String::new();
    let s = &project.settings;
    let _ = writeln!(
        out,
        "Project \"{}\" {}x{} @ {}/{} fps, {} Hz",
        project.name, s.width, s.height, s.frame_rate.num, s.frame_rate.den, s.sample_rate
    );
    let (start, end) = timeline.range();
    let _ = writeln!(
        out,
        "Timeline [{start}, {end}) ms, current {} ms",
        timeline.current_time()
    );

    for track in timeline.tracks() {
        let mut flags = Vec::new();
        if track.locked {
            flags.push("locked");
        }
        if track.muted {
            flags.push("muted");
        }
        if !track.visible {
            flags.push("hidden");
        }
        let _ = writeln!(
            out,
            "Track {} {} \"{}\"{}",
            track.id,
            track.kind,
            track.name,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            }
        );
        for &id in &track.clips {
            let Ok(clip) = timeline.clip(id) else {
                continue;
            };
            let group = clip
                .group_id
                .map(|g| format!(" group {g}"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  clip {} {} [{}, {}) offsets {}/{}{group} \"{}\"",
                clip.id,
                clip.kind(),
                clip.start,
                clip.end,
                clip.start_offset,
                clip.end_offset,
                clip.name
            );
        }
        for &id in &track.overlaps {
            if let Ok(o) = timeline.overlap(id) {
                let _ = writeln!(
                    out,
                    "  overlap {} [{}, {}) {} -> {}",
                    o.id, o.start, o.end, o.front, o.rear
                );
            }
        }
    }

    for group in timeline.groups() {
        let members: Vec<String> = group.members.iter().map(|m| m.to_string()).collect();
        let _ = writeln!(out, "Group {}: {}", group.id, members.join(", "));
    }
    out
}

pub fn run_inspect(args: InspectArgs) -> Result<()> {
    let (project, timeline, report) = open(&args.project, EditConfig::default())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&project.timeline)?);
        return Ok(());
    }
    print!("{}", render_summary(&project, &timeline));
    for issue in &report.issues {
        eprintln!("{issue}");
    }
    Ok(())
}

pub fn run_check(args: CheckArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EditConfig::load_from_file(path)
            .with_context(|| format!("cannot read config {}", path.display()))?,
        None => EditConfig::default(),
    };
    let (_, timeline, report) = open(&args.project, config)?;

    for issue in &report.issues {
        println!("{issue}");
    }
    let problems = timeline.validate();
    for problem in &problems {
        println!("invariant: {problem}");
    }

    let errors = report
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Error || args.strict)
        .count()
        + problems.len();
    if errors > 0 {
        bail!("{} failed with {errors} problem(s)", args.project.display());
    }
    println!(
        "ok: {} tracks, {} clips, {} overlaps",
        timeline.track_ids().len(),
        timeline.clip_count(),
        timeline.overlaps().count()
    );
    Ok(())
}

pub fn run_history(args: HistoryArgs) -> Result<()> {
    let (mut project, mut timeline, report) = open(&args.project, EditConfig::default())?;
    if report.errors().next().is_some() {
        bail!("{} does not load cleanly; run `trackweave check`", args.project.display());
    }
    let json = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read script {}", args.script.display()))?;
    let ops = script::parse_script(&json)?;

    for line in script::apply_all(&mut timeline, &ops)? {
        println!("{line}");
    }

    let history = timeline.history();
    for (i, entry) in history.entries().iter().enumerate() {
        let marker = if i + 1 == history.cursor() { '*' } else { ' ' };
        let actions: Vec<&str> = entry.actions.iter().map(|a| a.name()).collect();
        println!("{marker} {i}: {} [{}]", entry.description, actions.join(", "));
    }

    if args.save {
        project.store_timeline(&timeline)?;
        project.save_to_file(&args.project)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_args(dir: &TempDir, tracks: &[&str]) -> NewArgs {
        NewArgs {
            name: "demo".into(),
            preset: "720p".into(),
            tracks: tracks.iter().map(|t| t.to_string()).collect(),
            output: Some(dir.path().join("demo")),
        }
    }

    #[test]
    fn new_then_check_passes() {
        let dir = TempDir::new().unwrap();
        let path = run_new(new_args(&dir, &["video", "audio"])).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("twproj"));

        run_check(CheckArgs {
            project: path.clone(),
            config: None,
            strict: true,
        })
        .unwrap();

        let (project, timeline, _) = open(&path, EditConfig::default()).unwrap();
        let summary = render_summary(&project, &timeline);
        assert!(summary.contains("1280x720 @ 30/1 fps"));
        assert!(summary.contains("video \"V1\""));
        assert!(summary.contains("audio \"A1\""));
    }

    #[test]
    fn unknown_preset_and_kind_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut args = new_args(&dir, &["video"]);
        args.preset = "8k".into();
        assert!(run_new(args).is_err());
        assert!(run_new(new_args(&dir, &["hologram"])).is_err());
    }

    #[test]
    fn history_script_is_saved() {
        let dir = TempDir::new().unwrap();
        let path = run_new(new_args(&dir, &["video"])).unwrap();
        let (_, timeline, _) = open(&path, EditConfig::default()).unwrap();
        let track = timeline.track_ids()[0];

        let script = dir.path().join("edits.json");
        std::fs::write(
            &script,
            format!(
                r#"[
                    {{"op": "add_clip", "track": {track}, "kind": "video", "start": 0, "length": 4000}},
                    {{"op": "commit", "description": "Add"}}
                ]"#
            ),
        )
        .unwrap();
        run_history(HistoryArgs {
            project: path.clone(),
            script,
            save: true,
        })
        .unwrap();

        let (_, timeline, report) = open(&path, EditConfig::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(timeline.clip_count(), 1);
    }

    #[test]
    fn check_fails_on_orphan_clip() {
        let dir = TempDir::new().unwrap();
        let path = run_new(new_args(&dir, &["video"])).unwrap();
        let mut project = Project::load_from_file(&path).unwrap();
        project.timeline.media_clip.push(serde_json::json!({
            "ID": 500,
            "Type": "video",
            "Start": 0,
            "End": 1000,
        }));
        project.save_to_file(&path).unwrap();

        let result = run_check(CheckArgs {
            project: path,
            config: None,
            strict: false,
        });
        assert!(result.is_err());
    }
}
