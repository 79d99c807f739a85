use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

// ---------------------------------------------------------------------------
// TimeMs
// ---------------------------------------------------------------------------

/// Absolute or relative timeline time in milliseconds.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct TimeMs(pub i64);

impl TimeMs {
    pub const ZERO: Self = Self(0);

    pub fn from_seconds(s: f64) -> Self {
        Self((s * 1_000.0) as i64)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn signum(self) -> i64 {
        self.0.signum()
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for TimeMs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for TimeMs {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for TimeMs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for TimeMs {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for TimeMs {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Mul<i64> for TimeMs {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<i64> for TimeMs {
    type Output = Self;
    fn div(self, rhs: i64) -> Self {
        Self(self.0 / rhs)
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = self.0.unsigned_abs();
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let total_mins = total_secs / 60;
        let mins = total_mins % 60;
        let hours = total_mins / 60;
        if self.0 < 0 {
            write!(f, "-{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        } else {
            write!(f, "{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(ClipId);
entity_id!(TrackId);
entity_id!(OverlapId);
entity_id!(GroupId);
entity_id!(
    /// Scoped to the owning clip's event stack.
    EventId
);
entity_id!(
    /// Reference into the media bin; the timeline never resolves it.
    MediaId
);

/// Monotonic id source shared by every entity kind of one timeline.
///
/// Ids are never reused, so a stale id held by a caller fails lookup instead
/// of aliasing a newer entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdGenerator {
    next: i64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Resume from a persisted state.
    pub fn with_state(next: i64) -> Self {
        Self { next: next.max(1) }
    }

    pub fn state(&self) -> i64 {
        self.next
    }

    pub fn next_raw(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn next_clip(&mut self) -> ClipId {
        ClipId(self.next_raw())
    }

    pub fn next_track(&mut self) -> TrackId {
        TrackId(self.next_raw())
    }

    pub fn next_overlap(&mut self) -> OverlapId {
        OverlapId(self.next_raw())
    }

    pub fn next_group(&mut self) -> GroupId {
        GroupId(self.next_raw())
    }

    /// Make sure ids loaded from elsewhere are never handed out again.
    pub fn observe(&mut self, raw: i64) {
        if raw >= self.next {
            self.next = raw + 1;
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// MediaKind / TrackKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Text,
    Image,
    ImageSequence,
}

impl MediaKind {
    /// Trimmable kinds carry source offsets; stills and text never do.
    pub fn is_trimmable(self) -> bool {
        matches!(
            self,
            MediaKind::Video | MediaKind::Audio | MediaKind::ImageSequence
        )
    }

    pub fn track_kind(self) -> TrackKind {
        match self {
            MediaKind::Video | MediaKind::Image | MediaKind::ImageSequence => TrackKind::Video,
            MediaKind::Audio => TrackKind::Audio,
            MediaKind::Text => TrackKind::Text,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Text => "text",
            MediaKind::Image => "image",
            MediaKind::ImageSequence => "image_sequence",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
    Text,
}

impl TrackKind {
    pub fn accepts(self, kind: MediaKind) -> bool {
        kind.track_kind() == self
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Text => "text",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Edge / Color
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Start,
    End,
}

/// Packed 0xRRGGBBAA display color.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Self = Self(0xffff_ffff);

    const PALETTE: [u32; 8] = [
        0xe0_6c_75_ff,
        0x98_c3_79_ff,
        0xe5_c0_7b_ff,
        0x61_af_ef_ff,
        0xc6_78_dd_ff,
        0x56_b6_c2_ff,
        0xd1_9a_66_ff,
        0xab_b2_bf_ff,
    ];

    /// Stable palette pick so the same group keeps its color across reloads.
    pub fn for_group(id: GroupId) -> Self {
        Self(Self::PALETTE[id.0.unsigned_abs() as usize % Self::PALETTE.len()])
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
