use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CoreError, Result};
use crate::events::EventStack;
use crate::time::{AlignMode, FrameRate};
use crate::types::*;

// ---------------------------------------------------------------------------
// ClipContent
// ---------------------------------------------------------------------------

/// Kind-specific payload of a clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClipContent {
    Video {
        source_duration: TimeMs,
        #[serde(default)]
        frame_rate: FrameRate,
        #[serde(default)]
        width: u32,
        #[serde(default)]
        height: u32,
    },
    Audio {
        source_duration: TimeMs,
        #[serde(default = "default_channels")]
        channels: u32,
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default = "default_volume")]
        volume: f64,
    },
    ImageSequence {
        source_duration: TimeMs,
        #[serde(default)]
        frame_rate: FrameRate,
    },
    Image {
        #[serde(default)]
        width: u32,
        #[serde(default)]
        height: u32,
    },
    Text {
        text: String,
        #[serde(default)]
        font: String,
        #[serde(default = "default_font_size")]
        font_size: u32,
        #[serde(default)]
        color: Color,
        #[serde(default)]
        x: f32,
        #[serde(default)]
        y: f32,
    },
}

fn default_channels() -> u32 {
    2
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_volume() -> f64 {
    1.0
}

fn default_font_size() -> u32 {
    48
}

impl ClipContent {
    pub fn video(source_duration: TimeMs) -> Self {
        ClipContent::Video {
            source_duration,
            frame_rate: FrameRate::default(),
            width: 0,
            height: 0,
        }
    }

    pub fn audio(source_duration: TimeMs) -> Self {
        ClipContent::Audio {
            source_duration,
            channels: default_channels(),
            sample_rate: default_sample_rate(),
            volume: default_volume(),
        }
    }

    pub fn image() -> Self {
        ClipContent::Image {
            width: 0,
            height: 0,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ClipContent::Text {
            text: text.into(),
            font: String::new(),
            font_size: default_font_size(),
            color: Color::WHITE,
            x: 0.0,
            y: 0.0,
        }
    }

    /// Placeholder payload for a kind when a persisted record carries none.
    pub fn placeholder(kind: MediaKind, source_duration: TimeMs) -> Self {
        match kind {
            MediaKind::Video => Self::video(source_duration),
            MediaKind::Audio => Self::audio(source_duration),
            MediaKind::ImageSequence => ClipContent::ImageSequence {
                source_duration,
                frame_rate: FrameRate::default(),
            },
            MediaKind::Image => Self::image(),
            MediaKind::Text => Self::text(""),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            ClipContent::Video { .. } => MediaKind::Video,
            ClipContent::Audio { .. } => MediaKind::Audio,
            ClipContent::ImageSequence { .. } => MediaKind::ImageSequence,
            ClipContent::Image { .. } => MediaKind::Image,
            ClipContent::Text { .. } => MediaKind::Text,
        }
    }

    /// Length of the underlying source; `None` for stills and text.
    pub fn source_duration(&self) -> Option<TimeMs> {
        match self {
            ClipContent::Video {
                source_duration, ..
            }
            | ClipContent::Audio {
                source_duration, ..
            }
            | ClipContent::ImageSequence {
                source_duration, ..
            } => Some(*source_duration),
            ClipContent::Image { .. } | ClipContent::Text { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ClipSpan
// ---------------------------------------------------------------------------

/// Everything a crop or cut can change on a clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipSpan {
    pub start: TimeMs,
    pub end: TimeMs,
    pub start_offset: TimeMs,
    pub end_offset: TimeMs,
    #[serde(default, skip_serializing_if = "EventStack::is_empty")]
    pub events: EventStack,
}

// ---------------------------------------------------------------------------
// Clip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    pub id: ClipId,
    pub track_id: TrackId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub media_id: Option<MediaId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    pub start: TimeMs,
    pub end: TimeMs,
    #[serde(default)]
    pub start_offset: TimeMs,
    #[serde(default)]
    pub end_offset: TimeMs,
    /// Placeholder clips are shown but never edited.
    #[serde(default)]
    pub dummy: bool,
    pub content: ClipContent,
    #[serde(default, skip_serializing_if = "EventStack::is_empty")]
    pub events: EventStack,
}

impl Clip {
    /// Place `content` at `[start, end)`. For trimmable kinds whatever the
    /// range leaves of the source becomes the end offset.
    pub fn new(
        id: ClipId,
        track_id: TrackId,
        content: ClipContent,
        start: TimeMs,
        end: TimeMs,
    ) -> Self {
        let end_offset = match content.source_duration() {
            Some(source) => (source - (end - start)).max(TimeMs::ZERO),
            None => TimeMs::ZERO,
        };
        Self {
            id,
            track_id,
            name: String::new(),
            path: None,
            media_id: None,
            group_id: None,
            start,
            end,
            start_offset: TimeMs::ZERO,
            end_offset,
            dummy: false,
            content,
            events: EventStack::new(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.content.kind()
    }

    pub fn is_trimmable(&self) -> bool {
        self.kind().is_trimmable()
    }

    pub fn length(&self) -> TimeMs {
        self.end - self.start
    }

    pub fn source_duration(&self) -> Option<TimeMs> {
        self.content.source_duration()
    }

    pub fn intersects(&self, other: &Clip) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_time(&self, t: TimeMs) -> bool {
        self.start <= t && t < self.end
    }

    /// Source position shown at timeline time `t`.
    pub fn source_time_at(&self, t: TimeMs) -> TimeMs {
        self.start_offset + (t - self.start)
    }

    pub fn span(&self) -> ClipSpan {
        ClipSpan {
            start: self.start,
            end: self.end,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            events: self.events.clone(),
        }
    }

    pub fn set_span(&mut self, span: &ClipSpan) {
        self.start = span.start;
        self.end = span.end;
        self.start_offset = span.start_offset;
        self.end_offset = span.end_offset;
        self.events = span.events.clone();
    }

    pub fn shift(&mut self, diff: TimeMs) {
        self.start += diff;
        self.end += diff;
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(CoreError::Invariant(format!(
                "clip {} has empty range [{}, {})",
                self.id, self.start.0, self.end.0
            )));
        }
        if self.is_trimmable() {
            if self.start_offset < TimeMs::ZERO || self.end_offset < TimeMs::ZERO {
                return Err(CoreError::Invariant(format!(
                    "clip {} has negative offsets ({}, {})",
                    self.id, self.start_offset.0, self.end_offset.0
                )));
            }
            if let Some(source) = self.source_duration().filter(|d| d.0 > 0) {
                let covered = self.length() + self.start_offset + self.end_offset;
                if covered != source {
                    return Err(CoreError::Invariant(format!(
                        "clip {} covers {} ms of a {} ms source",
                        self.id, covered.0, source.0
                    )));
                }
            }
        } else if !self.start_offset.is_zero() || !self.end_offset.is_zero() {
            return Err(CoreError::Invariant(format!(
                "{} clip {} carries offsets",
                self.kind(),
                self.id
            )));
        }
        Ok(())
    }

    /// Move one edge by `diff`, snapped to the frame grid.
    ///
    /// Trimmable clips consume or release source offset and never expose
    /// more than the source holds; every clip keeps at least one frame.
    /// Returns the applied delta; zero means nothing changed.
    pub fn crop(&mut self, diff: TimeMs, edge: Edge, rate: FrameRate) -> TimeMs {
        if diff.is_zero() || self.dummy {
            return TimeMs::ZERO;
        }
        let trimmable = self.is_trimmable();
        match edge {
            Edge::Start => {
                let mut lower = TimeMs::ZERO;
                if trimmable {
                    lower = lower.max(self.start - self.start_offset);
                }
                let mut target = rate.align(self.start + diff, AlignMode::Floor);
                if target < lower {
                    target = rate.align(lower, AlignMode::Ceil);
                }
                target = target.min(rate.align_to_prev_frame(self.end));
                if target < lower || target >= self.end {
                    return TimeMs::ZERO;
                }
                let applied = target - self.start;
                if applied.is_zero() {
                    return TimeMs::ZERO;
                }
                self.start = target;
                if trimmable {
                    self.start_offset += applied;
                }
                self.events.shift(-applied);
                self.events.clamp_to(self.length());
                applied
            }
            Edge::End => {
                let mut target = rate.align(self.end + diff, AlignMode::Floor);
                if trimmable {
                    let upper = self.end + self.end_offset;
                    if target > upper {
                        target = rate.align(upper, AlignMode::Floor);
                    }
                }
                target = target.max(rate.align_to_next_frame(self.start));
                if target <= self.start || (trimmable && target > self.end + self.end_offset) {
                    return TimeMs::ZERO;
                }
                let applied = target - self.end;
                if applied.is_zero() {
                    return TimeMs::ZERO;
                }
                self.end = target;
                if trimmable {
                    self.end_offset -= applied;
                }
                self.events.clamp_to(self.length());
                applied
            }
        }
    }

    /// Split at `pos` (rounded to the nearest frame). `self` keeps the head;
    /// the returned tail carries `new_id` and no group.
    pub fn split(&mut self, pos: TimeMs, new_id: ClipId, rate: FrameRate) -> Option<Clip> {
        let pos = rate.align(pos, AlignMode::Round);
        if self.dummy || pos <= self.start || pos >= self.end {
            return None;
        }
        let head_len = pos - self.start;
        let original_end = self.end;
        let length = self.length();

        let mut tail = self.clone();
        tail.id = new_id;
        tail.group_id = None;
        tail.start = pos;
        tail.end = original_end;
        tail.events = self.events.split_off(head_len, length);

        if self.is_trimmable() {
            tail.start_offset = self.start_offset + head_len;
            tail.end_offset = self.end_offset;
            self.end_offset += original_end - pos;
        }
        self.end = pos;
        Some(tail)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_video(start: i64, end: i64) -> Clip {
        Clip::new(
            ClipId(1),
            TrackId(100),
            ClipContent::video(TimeMs(end - start)),
            TimeMs(start),
            TimeMs(end),
        )
    }

    fn make_text(start: i64, end: i64) -> Clip {
        Clip::new(
            ClipId(2),
            TrackId(200),
            ClipContent::text("title"),
            TimeMs(start),
            TimeMs(end),
        )
    }

    #[test]
    fn new_trimmable_clip_derives_end_offset() {
        let clip = Clip::new(
            ClipId(1),
            TrackId(1),
            ClipContent::video(TimeMs(10_000)),
            TimeMs(0),
            TimeMs(4_000),
        );
        assert_eq!(clip.end_offset, TimeMs(6_000));
        assert!(clip.check_invariants().is_ok());
    }

    #[test]
    fn crop_start_consumes_start_offset() {
        let mut clip = make_video(0, 10_000);
        let applied = clip.crop(TimeMs(500), Edge::Start, FrameRate::FPS_25);
        assert_eq!(applied, TimeMs(480));
        assert_eq!(clip.start, TimeMs(480));
        assert_eq!(clip.start_offset, TimeMs(480));
        assert!(clip.check_invariants().is_ok());
    }

    #[test]
    fn crop_start_cannot_expose_more_than_the_source() {
        let mut clip = make_video(1_000, 11_000);
        clip.crop(TimeMs(400), Edge::Start, FrameRate::FPS_25);
        let applied = clip.crop(TimeMs(-2_000), Edge::Start, FrameRate::FPS_25);
        assert_eq!(applied, TimeMs(-400));
        assert_eq!(clip.start_offset, TimeMs::ZERO);
        assert_eq!(clip.start, TimeMs(1_000));
    }

    #[test]
    fn crop_start_stops_one_frame_before_end() {
        let mut clip = make_video(0, 10_000);
        let applied = clip.crop(TimeMs(50_000), Edge::Start, FrameRate::FPS_25);
        assert_eq!(applied, TimeMs(9_960));
        assert_eq!(clip.length(), TimeMs(40));
        assert!(clip.check_invariants().is_ok());
    }

    #[test]
    fn crop_end_is_bounded_by_end_offset() {
        let mut clip = make_video(0, 10_000);
        assert_eq!(clip.crop(TimeMs(1_000), Edge::End, FrameRate::FPS_25), TimeMs::ZERO);
        let applied = clip.crop(TimeMs(-2_000), Edge::End, FrameRate::FPS_25);
        assert_eq!(applied, TimeMs(-2_000));
        assert_eq!(clip.end_offset, TimeMs(2_000));
        let applied = clip.crop(TimeMs(5_000), Edge::End, FrameRate::FPS_25);
        assert_eq!(applied, TimeMs(2_000));
        assert_eq!(clip.end_offset, TimeMs::ZERO);
    }

    #[test]
    fn crop_end_keeps_one_frame() {
        let mut clip = make_video(0, 10_000);
        clip.crop(TimeMs(-20_000), Edge::End, FrameRate::FPS_25);
        assert_eq!(clip.end, TimeMs(40));
        assert_eq!(clip.end_offset, TimeMs(9_960));
    }

    #[test]
    fn crop_untrimmable_never_touches_offsets() {
        let mut clip = make_text(1_000, 3_000);
        let applied = clip.crop(TimeMs(7_000), Edge::End, FrameRate::FPS_25);
        assert_eq!(applied, TimeMs(7_000));
        let applied = clip.crop(TimeMs(-5_000), Edge::Start, FrameRate::FPS_25);
        assert_eq!(applied, TimeMs(-1_000));
        assert_eq!(clip.start, TimeMs::ZERO);
        assert_eq!(clip.start_offset, TimeMs::ZERO);
        assert_eq!(clip.end_offset, TimeMs::ZERO);
    }

    #[test]
    fn crop_dummy_is_a_no_op() {
        let mut clip = make_video(0, 10_000);
        clip.dummy = true;
        assert_eq!(clip.crop(TimeMs(1_000), Edge::Start, FrameRate::FPS_25), TimeMs::ZERO);
        assert_eq!(clip.start, TimeMs::ZERO);
    }

    #[test]
    fn crop_start_shifts_events() {
        let mut clip = make_video(0, 10_000);
        let length = clip.length();
        let id = clip
            .events
            .add(TimeMs(1_000), TimeMs(2_000), 0, length)
            .unwrap();
        clip.crop(TimeMs(480), Edge::Start, FrameRate::FPS_25);
        let event = clip.events.get(id).unwrap();
        assert_eq!((event.start, event.end), (TimeMs(520), TimeMs(1_520)));
    }

    #[test]
    fn split_partitions_range_and_offsets() {
        let mut clip = make_video(0, 10_000);
        let tail = clip.split(TimeMs(4_000), ClipId(9), FrameRate::FPS_25).unwrap();
        assert_eq!((clip.start, clip.end), (TimeMs(0), TimeMs(4_000)));
        assert_eq!((tail.start, tail.end), (TimeMs(4_000), TimeMs(10_000)));
        assert_eq!(tail.start_offset, clip.start_offset + TimeMs(4_000));
        assert_eq!(clip.end_offset, TimeMs(6_000));
        assert_eq!(tail.end_offset, TimeMs::ZERO);
        assert!(clip.check_invariants().is_ok());
        assert!(tail.check_invariants().is_ok());
    }

    #[test]
    fn split_outside_range_is_rejected() {
        let mut clip = make_video(1_000, 5_000);
        let rate = FrameRate::FPS_25;
        assert!(clip.split(TimeMs(1_000), ClipId(9), rate).is_none());
        assert!(clip.split(TimeMs(5_000), ClipId(9), rate).is_none());
        assert!(clip.split(TimeMs(7_000), ClipId(9), rate).is_none());
        assert_eq!(clip.end, TimeMs(5_000));
    }

    #[test]
    fn split_text_keeps_zero_offsets() {
        let mut clip = make_text(0, 3_000);
        let tail = clip.split(TimeMs(1_000), ClipId(3), FrameRate::FPS_25).unwrap();
        assert_eq!(tail.start_offset, TimeMs::ZERO);
        assert_eq!(clip.end_offset, TimeMs::ZERO);
    }

    #[test]
    fn invariant_check_catches_bad_offsets() {
        let mut clip = make_video(0, 10_000);
        clip.end_offset = TimeMs(-1);
        assert!(matches!(clip.check_invariants(), Err(CoreError::Invariant(_))));

        let mut text = make_text(0, 1_000);
        text.start_offset = TimeMs(10);
        assert!(text.check_invariants().is_err());
    }

    #[test]
    fn serde_roundtrip_clip() {
        let mut clip = make_video(0, 10_000);
        clip.name = "intro.mp4".to_string();
        clip.media_id = Some(MediaId(77));
        let json = serde_json::to_string(&clip).unwrap();
        let back: Clip = serde_json::from_str(&json).unwrap();
        assert_eq!(clip, back);
    }
}
