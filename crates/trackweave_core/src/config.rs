use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::types::TimeMs;

/// Tunables for interactive editing. The snapping values are empirical
/// defaults, not invariants of the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EditConfig {
    pub magnetic_snap: bool,
    /// Snap reach in screen pixels; divided by the view scale to get time.
    pub snap_distance_px: f64,
    /// Fraction of the snap reach a drag must travel to leave a snap.
    pub snap_release_ratio: f64,
    /// Reject moves that would stack an overlap on another overlap.
    pub reject_stacked_overlaps: bool,
    /// Length given to stills and text when inserted without one.
    pub default_still_length: TimeMs,
    pub history_depth: usize,
    /// Optional upper bound for clip ends.
    pub max_timeline_end: Option<TimeMs>,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            magnetic_snap: true,
            snap_distance_px: 10.0,
            snap_release_ratio: 0.2,
            reject_stacked_overlaps: true,
            default_still_length: TimeMs(5_000),
            history_depth: 100,
            max_timeline_end: None,
        }
    }
}

impl EditConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Snap reach in milliseconds at `pixels_per_ms`.
    pub fn snap_threshold(&self, pixels_per_ms: f64) -> TimeMs {
        if pixels_per_ms <= 0.0 {
            return TimeMs::ZERO;
        }
        TimeMs((self.snap_distance_px / pixels_per_ms).round() as i64)
    }
}
