//! Per-clip event stack.
//!
//! Events are sub-ranges of their clip, expressed relative to the clip start
//! and confined to `[0, length)`. Events sharing a layer (`z`) follow the same
//! neighbour rules as clips on a track: they never intersect, and edits are
//! clamped against the previous/next event on the layer.

use serde::{Deserialize, Serialize};

use crate::overlap::FilterDocument;
use crate::types::{EventId, TimeMs};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub start: TimeMs,
    pub end: TimeMs,
    pub z: i32,
    #[serde(default)]
    pub filter: FilterDocument,
}

impl Event {
    pub fn length(&self) -> TimeMs {
        self.end - self.start
    }

    fn intersects(&self, start: TimeMs, end: TimeMs) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct EventStack {
    events: Vec<Event>,
}

impl EventStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    fn next_id(&self) -> EventId {
        EventId(self.events.iter().map(|e| e.id.0).max().unwrap_or(0) + 1)
    }

    fn sort(&mut self) {
        self.events.sort_by_key(|e| (e.z, e.start, e.id));
    }

    /// Add an event on layer `z`. Returns `None` when the range is degenerate,
    /// leaves `[0, length)`, or collides with another event on the layer.
    pub fn add(&mut self, start: TimeMs, end: TimeMs, z: i32, length: TimeMs) -> Option<EventId> {
        if start < TimeMs::ZERO || end > length || start >= end {
            return None;
        }
        if self
            .events
            .iter()
            .any(|e| e.z == z && e.intersects(start, end))
        {
            return None;
        }
        let id = self.next_id();
        self.events.push(Event {
            id,
            start,
            end,
            z,
            filter: FilterDocument::default(),
        });
        self.sort();
        Some(id)
    }

    pub fn remove(&mut self, id: EventId) -> Option<Event> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }

    /// Free space around event `id` on its layer: (previous end, next start).
    fn neighbour_bounds(&self, id: EventId, length: TimeMs) -> Option<(TimeMs, TimeMs)> {
        let event = self.get(id)?;
        let mut lower = TimeMs::ZERO;
        let mut upper = length;
        for other in self.events.iter().filter(|e| e.z == event.z && e.id != id) {
            if other.end <= event.start {
                lower = lower.max(other.end);
            } else if other.start >= event.end {
                upper = upper.min(other.start);
            }
        }
        Some((lower, upper))
    }

    /// Slide an event, clamped between its neighbours. Returns the applied delta.
    pub fn move_event(&mut self, id: EventId, diff: TimeMs, length: TimeMs) -> TimeMs {
        let Some((lower, upper)) = self.neighbour_bounds(id, length) else {
            return TimeMs::ZERO;
        };
        let Some(event) = self.events.iter_mut().find(|e| e.id == id) else {
            return TimeMs::ZERO;
        };
        let len = event.length();
        let start = (event.start + diff).max(lower).min(upper - len);
        let applied = start - event.start;
        event.start = start;
        event.end = start + len;
        self.sort();
        applied
    }

    /// Move one edge of an event, keeping at least `min_length`.
    pub fn crop_event(
        &mut self,
        id: EventId,
        diff: TimeMs,
        edge: crate::types::Edge,
        length: TimeMs,
        min_length: TimeMs,
    ) -> TimeMs {
        let Some((lower, upper)) = self.neighbour_bounds(id, length) else {
            return TimeMs::ZERO;
        };
        let Some(event) = self.events.iter_mut().find(|e| e.id == id) else {
            return TimeMs::ZERO;
        };
        let applied = match edge {
            crate::types::Edge::Start => {
                let start = (event.start + diff).max(lower).min(event.end - min_length);
                let applied = start - event.start;
                event.start = start;
                applied
            }
            crate::types::Edge::End => {
                let end = (event.end + diff).min(upper).max(event.start + min_length);
                let applied = end - event.end;
                event.end = end;
                applied
            }
        };
        self.sort();
        applied
    }

    /// Translate every event, used when the owning clip's start edge moves.
    pub fn shift(&mut self, diff: TimeMs) {
        for event in &mut self.events {
            event.start += diff;
            event.end += diff;
        }
    }

    /// Clip every event to `[0, length)` and drop the ones left empty.
    pub fn clamp_to(&mut self, length: TimeMs) {
        for event in &mut self.events {
            event.start = event.start.max(TimeMs::ZERO);
            event.end = event.end.min(length);
        }
        self.events.retain(|e| e.start < e.end);
    }

    /// Split at `pos` (clip-relative): `self` keeps `[0, pos)`, the returned
    /// stack holds `[pos, ..)` rebased to zero.
    pub fn split_off(&mut self, pos: TimeMs, length: TimeMs) -> EventStack {
        let mut tail = self.clone();
        self.clamp_to(pos);
        tail.shift(-pos);
        tail.clamp_to(length - pos);
        tail
    }

    /// Events on any layer covering clip-relative time `t`, lowest layer first.
    pub fn active_at(&self, t: TimeMs) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.start <= t && t < e.end)
    }
}
