//! Frame-grid alignment.
//!
//! Every clip and overlap boundary is routed through [`FrameRate::align`] so
//! that it lands on a frame tick. Ticks are `round(frame * den * 1000 / num)`
//! milliseconds; a time that already sits on a tick is returned unchanged,
//! which keeps alignment idempotent for rates whose frame duration is not a
//! whole number of milliseconds (29.97, 59.94, ...).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::TimeMs;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AlignMode {
    Floor,
    Round,
    Ceil,
}

/// Rational frame rate, e.g. 30000/1001.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_60: Self = Self::new(60, 1);
    pub const NTSC_30: Self = Self::new(30000, 1001);
    /// Alignment is a pass-through at this rate.
    pub const UNSET: Self = Self::new(0, 0);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn is_unset(&self) -> bool {
        self.num == 0 || self.den == 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.is_unset() {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Frame duration in (fractional) milliseconds.
    pub fn frame_duration_ms(&self) -> f64 {
        if self.is_unset() {
            0.0
        } else {
            self.den as f64 * 1_000.0 / self.num as f64
        }
    }

    /// Frame index containing `t`, rounded according to `mode`.
    pub fn frame_index(&self, t: TimeMs, mode: AlignMode) -> i64 {
        if self.is_unset() {
            return t.0;
        }
        let n = t.0 as i128 * self.num as i128;
        let d = self.den as i128 * 1_000;
        let frame = match mode {
            AlignMode::Floor => n.div_euclid(d),
            AlignMode::Ceil => -(-n).div_euclid(d),
            AlignMode::Round => (2 * n + d).div_euclid(2 * d),
        };
        frame as i64
    }

    /// Millisecond tick of frame `frame`.
    pub fn frame_to_time(&self, frame: i64) -> TimeMs {
        if self.is_unset() {
            return TimeMs(frame);
        }
        let x = frame as i128 * self.den as i128 * 1_000;
        let num = self.num as i128;
        TimeMs((2 * x + num).div_euclid(2 * num) as i64)
    }

    pub fn is_aligned(&self, t: TimeMs) -> bool {
        self.is_unset() || self.frame_to_time(self.frame_index(t, AlignMode::Round)) == t
    }

    pub fn align(&self, t: TimeMs, mode: AlignMode) -> TimeMs {
        if self.is_aligned(t) {
            return t;
        }
        self.frame_to_time(self.frame_index(t, mode))
    }

    /// First tick strictly after `t`.
    pub fn align_to_next_frame(&self, t: TimeMs) -> TimeMs {
        if self.is_unset() {
            return t;
        }
        let base = if self.is_aligned(t) {
            self.frame_index(t, AlignMode::Round)
        } else {
            self.frame_index(t, AlignMode::Floor)
        };
        self.frame_to_time(base + 1)
    }

    /// Last tick strictly before `t`.
    pub fn align_to_prev_frame(&self, t: TimeMs) -> TimeMs {
        if self.is_unset() {
            return t;
        }
        let base = if self.is_aligned(t) {
            self.frame_index(t, AlignMode::Round)
        } else {
            self.frame_index(t, AlignMode::Ceil)
        };
        self.frame_to_time(base - 1)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_25
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
