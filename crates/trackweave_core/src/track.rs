use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::arena::Arena;
use crate::clip::Clip;
use crate::overlap::{ClipPair, Overlap};
use crate::types::*;

/// What one overlap maintenance pass did.
#[derive(Debug, Default)]
pub struct OverlapChanges {
    pub created: Vec<OverlapId>,
    pub updated: Vec<OverlapId>,
    pub removed: Vec<Overlap>,
}

impl OverlapChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Ordered, same-kind container of clip ids plus the overlaps between them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    pub name: String,
    pub expanded: bool,
    /// Hidden tracks are left out of composition.
    pub visible: bool,
    pub locked: bool,
    pub selected: bool,
    pub muted: bool,
    pub linked: Option<TrackId>,
    /// Sorted by clip start.
    pub clips: Vec<ClipId>,
    pub overlaps: Vec<OverlapId>,
}

impl Track {
    pub fn new(id: TrackId, kind: TrackKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            expanded: false,
            visible: true,
            locked: false,
            selected: false,
            muted: false,
            linked: None,
            clips: Vec::new(),
            overlaps: Vec::new(),
        }
    }

    pub fn accepts(&self, kind: MediaKind) -> bool {
        self.kind.accepts(kind)
    }

    pub fn contains_clip(&self, id: ClipId) -> bool {
        self.clips.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn insert_clip(&mut self, id: ClipId, clips: &Arena<Clip>) {
        if !self.contains_clip(id) {
            self.clips.push(id);
        }
        self.sort_clips(clips);
    }

    pub fn remove_clip(&mut self, id: ClipId) -> bool {
        match self.clips.iter().position(|&c| c == id) {
            Some(pos) => {
                self.clips.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn sort_clips(&mut self, clips: &Arena<Clip>) {
        self.clips.retain(|&id| clips.contains(id));
        self.clips.sort_by_key(|&id| {
            let clip = clips.get(id);
            (clip.map(|c| c.start).unwrap_or_default(), id)
        });
    }

    /// `[min start, max end)` over the track's clips.
    pub fn range(&self, clips: &Arena<Clip>) -> Option<(TimeMs, TimeMs)> {
        self.clips
            .iter()
            .filter_map(|&id| clips.get(id))
            .fold(None, |acc, c| match acc {
                None => Some((c.start, c.end)),
                Some((s, e)) => Some((s.min(c.start), e.max(c.end))),
            })
    }

    pub fn clip_at(&self, t: TimeMs, clips: &Arena<Clip>) -> Option<ClipId> {
        self.clips
            .iter()
            .copied()
            .find(|&id| clips.get(id).is_some_and(|c| c.contains_time(t)))
    }

    /// Whether `[start, end)` runs into an existing transition region.
    pub fn collides_with_overlaps(
        &self,
        start: TimeMs,
        end: TimeMs,
        overlaps: &Arena<Overlap>,
    ) -> bool {
        self.overlaps
            .iter()
            .filter_map(|&id| overlaps.get(id))
            .any(|o| o.start < end && start < o.end)
    }

    /// Re-sort, drop stale overlaps, then refresh or create one overlap per
    /// intersecting clip pair. Existing overlaps are matched by their
    /// unordered clip pair so their transitions survive the edit.
    pub fn update_overlaps(
        &mut self,
        clips: &Arena<Clip>,
        overlaps: &mut Arena<Overlap>,
        ids: &mut IdGenerator,
    ) -> OverlapChanges {
        self.sort_clips(clips);
        let mut changes = OverlapChanges::default();
        let members: HashSet<ClipId> = self.clips.iter().copied().collect();

        let mut by_pair: HashMap<ClipPair, OverlapId> = HashMap::new();
        let mut kept = Vec::with_capacity(self.overlaps.len());
        for oid in std::mem::take(&mut self.overlaps) {
            let Some(overlap) = overlaps.get(oid) else {
                continue;
            };
            let pair = overlap.pair();
            let valid = members.contains(&overlap.front)
                && members.contains(&overlap.rear)
                && !by_pair.contains_key(&pair)
                && match (clips.get(overlap.front), clips.get(overlap.rear)) {
                    (Some(a), Some(b)) => a.intersects(b),
                    _ => false,
                };
            if valid {
                by_pair.insert(pair, oid);
                kept.push(oid);
            } else if let Some(stale) = overlaps.remove(oid) {
                changes.removed.push(stale);
            }
        }

        let ordered: Vec<&Clip> = self.clips.iter().filter_map(|&id| clips.get(id)).collect();
        for (i, a) in ordered.iter().enumerate() {
            for b in &ordered[i + 1..] {
                if b.start >= a.end {
                    break;
                }
                if !a.intersects(b) {
                    continue;
                }
                let pair = ClipPair::new(a.id, b.id);
                match by_pair.get(&pair) {
                    Some(&oid) => {
                        if let Some(existing) = overlaps.get_mut(oid) {
                            existing.refresh(a, b);
                            changes.updated.push(oid);
                        }
                    }
                    None => {
                        let oid = ids.next_overlap();
                        if let Some(created) = Overlap::between(oid, a, b) {
                            overlaps.insert(created);
                            by_pair.insert(pair, oid);
                            kept.push(oid);
                            changes.created.push(oid);
                        }
                    }
                }
            }
        }

        kept.sort_by_key(|&oid| (overlaps.get(oid).map(|o| o.start).unwrap_or_default(), oid));
        self.overlaps = kept;
        changes
    }
}

/// True when some instant is covered by more than two ranges, i.e. the
/// ranges would stack an overlap on top of another overlap.
pub fn exceeds_double_coverage(ranges: &[(TimeMs, TimeMs)]) -> bool {
    let mut edges: Vec<(TimeMs, i32)> = Vec::with_capacity(ranges.len() * 2);
    for &(start, end) in ranges {
        if start < end {
            edges.push((start, 1));
            edges.push((end, -1));
        }
    }
    // Ends sort before starts at the same instant: touching is not covering.
    edges.sort();
    let mut depth = 0;
    for (_, step) in edges {
        depth += step;
        if depth > 2 {
            return true;
        }
    }
    false
}
