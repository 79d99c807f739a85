use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ClipId, GroupId, OverlapId, TrackId};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Clip not found: {0}")]
    ClipNotFound(ClipId),

    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Overlap not found: {0}")]
    OverlapNotFound(OverlapId),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Media probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("Overlap detected")]
    OverlapDetected,

    #[error("Track {track} does not accept {kind} clips")]
    IncompatibleTrack { track: TrackId, kind: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}

pub type Result<T> = std::result::Result<T, CoreError>;
