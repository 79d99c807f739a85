//! JSON edit scripts for the `history` command.
//!
//! ```json
//! [
//!   {"op": "add_clip", "track": 1, "kind": "video", "start": 0, "length": 4000},
//!   {"op": "move", "clip": 3, "diff": 500},
//!   {"op": "commit", "description": "Nudge"},
//!   {"op": "undo"}
//! ]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use trackweave_core::{
    ClipContent, ClipId, DropTarget, Edge, MediaKind, Timeline, TimeMs, TrackId, TrackKind,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    AddTrack {
        kind: TrackKind,
        #[serde(default)]
        index: Option<usize>,
    },
    AddClip {
        track: TrackId,
        kind: MediaKind,
        start: TimeMs,
        length: TimeMs,
    },
    RemoveClip {
        clip: ClipId,
    },
    Move {
        clip: ClipId,
        diff: TimeMs,
        #[serde(default)]
        track: Option<TrackId>,
        #[serde(default)]
        single: bool,
    },
    Crop {
        clip: ClipId,
        diff: TimeMs,
        edge: Edge,
    },
    Cut {
        clip: ClipId,
        at: TimeMs,
    },
    Group {
        clips: Vec<ClipId>,
    },
    Commit {
        description: String,
    },
    Undo,
    Redo,
}

pub fn parse_script(json: &str) -> Result<Vec<EditOp>> {
    serde_json::from_str(json).context("invalid edit script")
}

/// Apply one operation. Refused edits are reported, not fatal; missing
/// entities are.
pub fn apply(timeline: &mut Timeline, op: &EditOp) -> Result<String> {
    let outcome = match op {
        EditOp::AddTrack { kind, index } => {
            let id = timeline.new_track(*kind, *index);
            format!("added {kind} track {id}")
        }
        EditOp::AddClip {
            track,
            kind,
            start,
            length,
        } => {
            let content = ClipContent::placeholder(*kind, *length);
            match timeline.add_clip(*track, content, *start, *start + *length)? {
                Some(id) => format!("added clip {id}"),
                None => "clip refused".to_string(),
            }
        }
        EditOp::RemoveClip { clip } => {
            if timeline.remove_clip(*clip)? {
                format!("removed clip {clip}")
            } else {
                format!("clip {clip} kept")
            }
        }
        EditOp::Move {
            clip,
            diff,
            track,
            single,
        } => {
            let target = track.map_or(DropTarget::Same, DropTarget::Track);
            let moved = timeline.move_clip(*clip, *diff, *single, target)?;
            match moved.relocated_to {
                Some(dest) => format!(
                    "moved clip {clip} by {} ms to track {dest}",
                    moved.delta.0
                ),
                None => format!("moved clip {clip} by {} ms", moved.delta.0),
            }
        }
        EditOp::Crop { clip, diff, edge } => {
            let applied = timeline.crop_clip(*clip, *diff, *edge)?;
            format!("cropped clip {clip} by {} ms", applied.0)
        }
        EditOp::Cut { clip, at } => match timeline.cut_clip(*clip, *at)? {
            Some(tail) => format!("cut clip {clip}, new clip {tail}"),
            None => format!("clip {clip} not cut"),
        },
        EditOp::Group { clips } => match timeline.group_clips(clips)? {
            Some(group) => format!("grouped into {group}"),
            None => "nothing grouped".to_string(),
        },
        EditOp::Commit { description } => {
            if timeline.commit(description.as_str()) {
                format!("committed \"{description}\"")
            } else {
                "nothing to commit".to_string()
            }
        }
        EditOp::Undo => {
            timeline.undo()?;
            "undone".to_string()
        }
        EditOp::Redo => {
            timeline.redo()?;
            "redone".to_string()
        }
    };
    Ok(outcome)
}

/// Apply every operation in order and close the trailing batch.
pub fn apply_all(timeline: &mut Timeline, ops: &[EditOp]) -> Result<Vec<String>> {
    let mut log = Vec::with_capacity(ops.len());
    for (i, op) in ops.iter().enumerate() {
        let line = apply(timeline, op).with_context(|| format!("operation {i} ({op:?})"))?;
        tracing::debug!(index = i, outcome = %line, "edit applied");
        log.push(line);
    }
    timeline.commit("Script");
    let problems = timeline.validate();
    if !problems.is_empty() {
        bail!("timeline is inconsistent after the script: {}", problems[0]);
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackweave_core::{EditConfig, FrameRate};

    #[test]
    fn parses_tagged_operations() {
        let ops = parse_script(
            r#"[
                {"op": "add_track", "kind": "video"},
                {"op": "crop", "clip": 2, "diff": -40, "edge": "end"},
                {"op": "move", "clip": 2, "diff": 100, "track": 5},
                {"op": "undo"}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![
                EditOp::AddTrack {
                    kind: TrackKind::Video,
                    index: None
                },
                EditOp::Crop {
                    clip: ClipId(2),
                    diff: TimeMs(-40),
                    edge: Edge::End
                },
                EditOp::Move {
                    clip: ClipId(2),
                    diff: TimeMs(100),
                    track: Some(TrackId(5)),
                    single: false
                },
                EditOp::Undo,
            ]
        );
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(parse_script(r#"[{"op": "explode"}]"#).is_err());
    }

    #[test]
    fn script_builds_history() {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let ops = vec![
            EditOp::AddTrack {
                kind: TrackKind::Video,
                index: None,
            },
            EditOp::Commit {
                description: "Track".into(),
            },
        ];
        apply_all(&mut tl, &ops).unwrap();
        let track = tl.track_ids()[0];

        let ops = vec![
            EditOp::AddClip {
                track,
                kind: MediaKind::Video,
                start: TimeMs(0),
                length: TimeMs(4_000),
            },
            EditOp::Commit {
                description: "Add".into(),
            },
        ];
        apply_all(&mut tl, &ops).unwrap();
        let clip = tl.clips_on(track).unwrap()[0].id;

        let ops = vec![
            EditOp::Cut {
                clip,
                at: TimeMs(1_000),
            },
            EditOp::Commit {
                description: "Cut".into(),
            },
            EditOp::Undo,
        ];
        let log = apply_all(&mut tl, &ops).unwrap();
        assert_eq!(log.last().map(String::as_str), Some("undone"));
        assert_eq!(tl.clip_count(), 1);
        assert_eq!(tl.history().len(), 3);
        assert_eq!(tl.redo_description(), Some("Cut"));
    }

    #[test]
    fn outcome_lines_report_plain_milliseconds() {
        let config = EditConfig {
            magnetic_snap: false,
            ..EditConfig::default()
        };
        let mut tl = Timeline::with_config(FrameRate::FPS_25, config);
        let track = tl.new_track(TrackKind::Video, None);
        let added = apply(
            &mut tl,
            &EditOp::AddClip {
                track,
                kind: MediaKind::Video,
                start: TimeMs(0),
                length: TimeMs(4_000),
            },
        )
        .unwrap();
        assert!(added.starts_with("added clip"));
        let clip = tl.clips_on(track).unwrap()[0].id;

        let moved = apply(
            &mut tl,
            &EditOp::Move {
                clip,
                diff: TimeMs(480),
                track: None,
                single: false,
            },
        )
        .unwrap();
        assert_eq!(moved, format!("moved clip {clip} by 480 ms"));

        let cropped = apply(
            &mut tl,
            &EditOp::Crop {
                clip,
                diff: TimeMs(-400),
                edge: Edge::End,
            },
        )
        .unwrap();
        assert_eq!(cropped, format!("cropped clip {clip} by -400 ms"));
    }

    #[test]
    fn missing_clip_fails_with_context() {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let err = apply_all(
            &mut tl,
            &[EditOp::Crop {
                clip: ClipId(99),
                diff: TimeMs(10),
                edge: Edge::Start,
            }],
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("operation 0"));
    }
}
