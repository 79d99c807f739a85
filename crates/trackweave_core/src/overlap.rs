use serde::{Deserialize, Serialize};

use crate::clip::Clip;
use crate::types::{ClipId, OverlapId, TimeMs};

// ---------------------------------------------------------------------------
// FilterDocument
// ---------------------------------------------------------------------------

/// Opaque filter-graph document owned by the node-graph evaluator.
///
/// The timeline only clones, serializes and reloads it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct FilterDocument(serde_json::Value);

impl FilterDocument {
    pub fn load_from_document(doc: serde_json::Value) -> Self {
        Self(doc)
    }

    pub fn to_document(&self) -> serde_json::Value {
        self.0.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A keyframed parameter value; `time` is relative to the overlap start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyframe {
    pub param: String,
    pub time: TimeMs,
    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
    #[serde(default)]
    pub graph: FilterDocument,
}

impl Transition {
    /// Linear blend progress in `[0, 1]` across an overlap of `length`.
    pub fn progress(length: TimeMs, t: TimeMs) -> f64 {
        if length.0 <= 0 {
            return 1.0;
        }
        (t.0 as f64 / length.0 as f64).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// ClipPair
// ---------------------------------------------------------------------------

/// Unordered clip-id pair; the identity key of an overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClipPair(ClipId, ClipId);

impl ClipPair {
    pub fn new(a: ClipId, b: ClipId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn contains(&self, id: ClipId) -> bool {
        self.0 == id || self.1 == id
    }
}

/// `[max(starts), min(ends))` when non-empty.
pub fn intersection(
    a_start: TimeMs,
    a_end: TimeMs,
    b_start: TimeMs,
    b_end: TimeMs,
) -> Option<(TimeMs, TimeMs)> {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    (start < end).then_some((start, end))
}

// ---------------------------------------------------------------------------
// Overlap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Overlap {
    pub id: OverlapId,
    pub start: TimeMs,
    pub end: TimeMs,
    /// Clip with the earlier start.
    pub front: ClipId,
    pub rear: ClipId,
    #[serde(default)]
    pub transition: Transition,
}

impl Overlap {
    /// Build the overlap of two intersecting clips, or `None` if they do not
    /// intersect.
    pub fn between(id: OverlapId, a: &Clip, b: &Clip) -> Option<Self> {
        let (start, end) = intersection(a.start, a.end, b.start, b.end)?;
        let (front, rear) = order(a, b);
        Some(Self {
            id,
            start,
            end,
            front,
            rear,
            transition: Transition::default(),
        })
    }

    pub fn pair(&self) -> ClipPair {
        ClipPair::new(self.front, self.rear)
    }

    pub fn length(&self) -> TimeMs {
        self.end - self.start
    }

    pub fn references(&self, clip: ClipId) -> bool {
        self.front == clip || self.rear == clip
    }

    /// Replace `from` with `to` in the clip pair, keeping the transition.
    pub fn repoint(&mut self, from: ClipId, to: ClipId) {
        if self.front == from {
            self.front = to;
        }
        if self.rear == from {
            self.rear = to;
        }
    }

    /// Recompute the range from the two clips. Returns `false` when they no
    /// longer intersect; the overlap is then stale and must be dropped.
    pub fn refresh(&mut self, a: &Clip, b: &Clip) -> bool {
        match intersection(a.start, a.end, b.start, b.end) {
            Some((start, end)) => {
                let (front, rear) = order(a, b);
                self.start = start;
                self.end = end;
                self.front = front;
                self.rear = rear;
                true
            }
            None => false,
        }
    }
}

fn order(a: &Clip, b: &Clip) -> (ClipId, ClipId) {
    if (a.start, a.id) <= (b.start, b.id) {
        (a.id, b.id)
    } else {
        (b.id, a.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipContent;
    use crate::types::TrackId;

    fn video(id: i64, start: i64, end: i64) -> Clip {
        Clip::new(
            ClipId(id),
            TrackId(1),
            ClipContent::video(TimeMs(end - start)),
            TimeMs(start),
            TimeMs(end),
        )
    }

    #[test]
    fn intersection_of_ranges() {
        assert_eq!(
            intersection(TimeMs(0), TimeMs(5_000), TimeMs(4_000), TimeMs(9_000)),
            Some((TimeMs(4_000), TimeMs(5_000)))
        );
        assert_eq!(
            intersection(TimeMs(0), TimeMs(5_000), TimeMs(5_000), TimeMs(9_000)),
            None
        );
    }

    #[test]
    fn between_orders_front_and_rear() {
        let a = video(10, 4_000, 9_000);
        let b = video(20, 0, 5_000);
        let overlap = Overlap::between(OverlapId(1), &a, &b).unwrap();
        assert_eq!(overlap.front, ClipId(20));
        assert_eq!(overlap.rear, ClipId(10));
        assert_eq!((overlap.start, overlap.end), (TimeMs(4_000), TimeMs(5_000)));
    }

    #[test]
    fn refresh_reports_stale_overlap() {
        let a = video(1, 0, 5_000);
        let mut b = video(2, 4_000, 9_000);
        let mut overlap = Overlap::between(OverlapId(3), &a, &b).unwrap();
        b.start = TimeMs(6_000);
        b.end = TimeMs(11_000);
        assert!(!overlap.refresh(&a, &b));
    }

    #[test]
    fn pair_is_unordered() {
        assert_eq!(ClipPair::new(ClipId(2), ClipId(1)), ClipPair::new(ClipId(1), ClipId(2)));
    }

    #[test]
    fn repoint_keeps_transition() {
        let a = video(1, 0, 5_000);
        let b = video(2, 4_000, 9_000);
        let mut overlap = Overlap::between(OverlapId(3), &a, &b).unwrap();
        overlap.transition.graph =
            FilterDocument::load_from_document(serde_json::json!({"node": "dissolve"}));
        overlap.repoint(ClipId(1), ClipId(7));
        assert_eq!(overlap.pair(), ClipPair::new(ClipId(7), ClipId(2)));
        assert!(!overlap.transition.graph.is_empty());
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(Transition::progress(TimeMs(1_000), TimeMs(500)), 0.5);
        assert_eq!(Transition::progress(TimeMs(1_000), TimeMs(2_000)), 1.0);
        assert_eq!(Transition::progress(TimeMs(0), TimeMs(0)), 1.0);
    }
}
