pub mod arena;
pub mod clip;
pub mod config;
pub mod editing;
pub mod error;
pub mod events;
pub mod export;
pub mod group;
pub mod history;
pub mod media;
pub mod overlap;
pub mod project;
pub mod snapping;
pub mod sync;
pub mod time;
pub mod timeline;
pub mod track;
pub mod types;

pub use clip::{Clip, ClipContent, ClipSpan};
pub use config::EditConfig;
pub use editing::{DropTarget, MoveOutcome};
pub use error::{CoreError, Result};
pub use export::{CancelFlag, ExportError, ExportJob, ExportProgress, FrameSink};
pub use group::ClipGroup;
pub use history::{Action, HistoryEntry};
pub use media::{MediaInfo, MediaProbe, StreamInfo};
pub use overlap::{ClipPair, Keyframe, Overlap, Transition};
pub use project::{LoadReport, Project, ProjectSettings, TimelineDocument};
pub use sync::{
    CompositionSnapshot, DataLayer, MemoryEngine, SnapshotHandle, SyncBridge, SyncError, SyncReport,
};
pub use time::{AlignMode, FrameRate};
pub use timeline::{Notification, Timeline};
pub use track::Track;
pub use types::*;
