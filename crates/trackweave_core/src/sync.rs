//! Mirroring the model onto an external composition engine.
//!
//! The engine keeps its own copy of tracks, clips and overlaps and assigns
//! overlap ids on its own. [`SyncBridge`] forwards every applied [`Action`]
//! and, on [`SyncBridge::reconcile`], matches overlaps by their unordered
//! clip pair and copies the model's id and transition onto the engine
//! wherever either has drifted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arena::Arena;
use crate::clip::{Clip, ClipSpan};
use crate::history::Action;
use crate::overlap::{intersection, ClipPair, Overlap, Transition};
use crate::track::Track;
use crate::types::*;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error("engine has no overlap for clips {front} and {rear}")]
    MissingOverlap { front: ClipId, rear: ClipId },

    #[error("engine overlap {id} for clips {front} and {rear} is unknown to the model")]
    UnexpectedOverlap {
        id: OverlapId,
        front: ClipId,
        rear: ClipId,
    },

    #[error("engine has no track {0}")]
    UnknownTrack(TrackId),

    #[error("engine has no clip {0}")]
    UnknownClip(ClipId),

    #[error("engine has no overlap {0}")]
    UnknownOverlap(OverlapId),

    #[error("engine rejected the change: {0}")]
    Rejected(String),
}

/// An overlap as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOverlap {
    pub id: OverlapId,
    pub front: ClipId,
    pub rear: ClipId,
    pub start: TimeMs,
    pub end: TimeMs,
    pub transition: Transition,
}

impl EngineOverlap {
    pub fn pair(&self) -> ClipPair {
        ClipPair::new(self.front, self.rear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFlag {
    Muted(bool),
    Visible(bool),
    Locked(bool),
}

/// Id-addressed operations of a playback/composition engine.
pub trait DataLayer: Send {
    fn add_track(&mut self, track: &Track, index: usize) -> Result<(), SyncError>;
    fn remove_track(&mut self, track: TrackId) -> Result<(), SyncError>;
    fn move_track(&mut self, track: TrackId, index: usize) -> Result<(), SyncError>;
    fn set_track_state(&mut self, track: TrackId, flag: TrackFlag) -> Result<(), SyncError>;
    fn insert_clip(&mut self, clip: &Clip) -> Result<(), SyncError>;
    fn remove_clip(&mut self, track: TrackId, clip: ClipId) -> Result<(), SyncError>;
    fn change_clip_range(&mut self, clip: ClipId, span: &ClipSpan) -> Result<(), SyncError>;
    fn move_clip(&mut self, clip: ClipId, track: TrackId, start: TimeMs) -> Result<(), SyncError>;
    fn overlaps(&self) -> Vec<EngineOverlap>;
    /// Rename the engine overlap `current` to `id` and replace its transition.
    fn set_overlap_identity(
        &mut self,
        current: OverlapId,
        id: OverlapId,
        transition: &Transition,
    ) -> Result<(), SyncError>;
    fn set_transition(
        &mut self,
        front: ClipId,
        rear: ClipId,
        transition: &Transition,
    ) -> Result<(), SyncError>;
    /// Publish the current state to readers.
    fn refresh(&mut self) -> Result<(), SyncError>;
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub matched: usize,
    pub reassigned: usize,
    /// Engine overlaps whose transition was overwritten with the model's.
    pub retransitioned: usize,
    pub errors: Vec<SyncError>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SyncBridge
// ---------------------------------------------------------------------------

/// Owns the attached data layer, if any, and the errors raised while
/// projecting actions onto it.
#[derive(Default)]
pub struct SyncBridge {
    layer: Option<Box<dyn DataLayer>>,
    pending_errors: Vec<SyncError>,
}

impl fmt::Debug for SyncBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBridge")
            .field("attached", &self.layer.is_some())
            .field("pending_errors", &self.pending_errors)
            .finish()
    }
}

impl SyncBridge {
    pub fn is_attached(&self) -> bool {
        self.layer.is_some()
    }

    /// Replay the given tracks (in composition order) and their clips onto
    /// `layer`, then keep it as the projection target.
    pub fn attach(&mut self, mut layer: Box<dyn DataLayer>, tracks: &[&Track], clips: &Arena<Clip>) {
        let mut errors = Vec::new();
        for (index, track) in tracks.iter().enumerate() {
            errors.extend(layer.add_track(track, index).err());
            for clip in track.clips.iter().filter_map(|&id| clips.get(id)) {
                errors.extend(layer.insert_clip(clip).err());
            }
        }
        errors.extend(layer.refresh().err());
        tracing::debug!(tracks = tracks.len(), errors = errors.len(), "data layer attached");
        self.record(errors);
        self.layer = Some(layer);
    }

    pub fn detach(&mut self) -> Option<Box<dyn DataLayer>> {
        self.pending_errors.clear();
        self.layer.take()
    }

    /// Forward one applied action. Group bookkeeping has no engine side.
    pub fn project(&mut self, action: &Action) {
        let Some(layer) = self.layer.as_mut() else {
            return;
        };
        let mut errors = Vec::new();
        match action {
            Action::AddClip { clip, .. } => errors.extend(layer.insert_clip(clip).err()),
            Action::RemoveClip { track_id, clip, .. } => {
                errors.extend(layer.remove_clip(*track_id, clip.id).err())
            }
            Action::MoveClip {
                clip_id,
                to_track,
                to_start,
                ..
            } => errors.extend(layer.move_clip(*clip_id, *to_track, *to_start).err()),
            Action::CropClip { clip_id, after, .. } => {
                errors.extend(layer.change_clip_range(*clip_id, after).err())
            }
            Action::CutClip {
                clip_id,
                after,
                new_clip,
                ..
            } => {
                errors.extend(layer.change_clip_range(*clip_id, after).err());
                errors.extend(layer.insert_clip(new_clip).err());
            }
            Action::UncutClip {
                track_id,
                clip_id,
                before,
                new_clip,
                ..
            } => {
                errors.extend(layer.remove_clip(*track_id, new_clip.id).err());
                errors.extend(layer.change_clip_range(*clip_id, before).err());
            }
            Action::AddTrack {
                index, snapshot, ..
            } => {
                errors.extend(layer.add_track(&snapshot.track, *index).err());
                for clip in &snapshot.clips {
                    errors.extend(layer.insert_clip(clip).err());
                }
            }
            Action::RemoveTrack { snapshot, .. } => {
                errors.extend(layer.remove_track(snapshot.track.id).err())
            }
            Action::MoveTrack { track_id, to, .. } => {
                errors.extend(layer.move_track(*track_id, *to).err())
            }
            Action::MuteTrack {
                track_id, muted, ..
            } => errors.extend(layer.set_track_state(*track_id, TrackFlag::Muted(*muted)).err()),
            Action::HideTrack {
                track_id, visible, ..
            } => errors.extend(
                layer
                    .set_track_state(*track_id, TrackFlag::Visible(*visible))
                    .err(),
            ),
            Action::LockTrack {
                track_id, locked, ..
            } => errors.extend(
                layer
                    .set_track_state(*track_id, TrackFlag::Locked(*locked))
                    .err(),
            ),
            Action::SetTransition {
                front, rear, after, ..
            } => errors.extend(layer.set_transition(*front, *rear, after).err()),
            Action::AddClipToGroup { .. }
            | Action::RemoveClipFromGroup { .. }
            | Action::AddGroup { .. }
            | Action::RemoveGroup { .. } => {}
        }
        self.record(errors);
    }

    /// Match engine overlaps to `overlaps` by clip pair, copy the model's
    /// id and transition wherever either differs, then refresh the engine.
    pub fn reconcile(&mut self, overlaps: &Arena<Overlap>) -> SyncReport {
        let mut report = SyncReport::default();
        let Some(layer) = self.layer.as_mut() else {
            return report;
        };
        report.errors = std::mem::take(&mut self.pending_errors);

        let mut engine: HashMap<ClipPair, EngineOverlap> = layer
            .overlaps()
            .into_iter()
            .map(|o| (o.pair(), o))
            .collect();

        for overlap in overlaps.sorted() {
            let Some(found) = engine.remove(&overlap.pair()) else {
                let err = SyncError::MissingOverlap {
                    front: overlap.front,
                    rear: overlap.rear,
                };
                tracing::error!(overlap = %overlap.id, error = %err, "overlap reconciliation failed");
                report.errors.push(err);
                continue;
            };
            if found.id == overlap.id {
                report.matched += 1;
                if found.transition == overlap.transition {
                    continue;
                }
                match layer.set_transition(overlap.front, overlap.rear, &overlap.transition) {
                    Ok(()) => report.retransitioned += 1,
                    Err(err) => {
                        tracing::error!(overlap = %overlap.id, error = %err, "transition push failed");
                        report.errors.push(err);
                    }
                }
                continue;
            }
            match layer.set_overlap_identity(found.id, overlap.id, &overlap.transition) {
                Ok(()) => report.reassigned += 1,
                Err(err) => {
                    tracing::error!(overlap = %overlap.id, error = %err, "overlap reassignment failed");
                    report.errors.push(err);
                }
            }
        }

        let mut leftovers: Vec<EngineOverlap> = engine.into_values().collect();
        leftovers.sort_by_key(|o| o.id);
        for o in leftovers {
            let err = SyncError::UnexpectedOverlap {
                id: o.id,
                front: o.front,
                rear: o.rear,
            };
            tracing::error!(error = %err, "overlap reconciliation failed");
            report.errors.push(err);
        }

        if let Err(err) = layer.refresh() {
            tracing::error!(error = %err, "data layer refresh failed");
            report.errors.push(err);
        }
        tracing::debug!(
            matched = report.matched,
            reassigned = report.reassigned,
            retransitioned = report.retransitioned,
            errors = report.errors.len(),
            "synchronized"
        );
        report
    }

    fn record(&mut self, errors: Vec<SyncError>) {
        for err in errors {
            tracing::error!(error = %err, "data layer projection failed");
            self.pending_errors.push(err);
        }
    }
}

// ---------------------------------------------------------------------------
// Composition snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotClip {
    pub id: ClipId,
    pub kind: MediaKind,
    pub start: TimeMs,
    pub end: TimeMs,
    pub start_offset: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLayer {
    pub track: TrackId,
    pub kind: TrackKind,
    pub muted: bool,
    /// Sorted by start.
    pub clips: Vec<SnapshotClip>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTransition {
    pub id: OverlapId,
    pub track: TrackId,
    pub start: TimeMs,
    pub end: TimeMs,
}

/// What a reader needs from one clip at a given instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveClip {
    pub track: TrackId,
    pub clip: ClipId,
    pub kind: MediaKind,
    /// Position inside the source media.
    pub source_time: TimeMs,
    pub muted: bool,
}

/// Immutable view of the composed timeline, published on refresh. Hidden
/// tracks are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionSnapshot {
    pub version: u64,
    /// Composition order, bottom first.
    pub layers: Vec<SnapshotLayer>,
    pub transitions: Vec<SnapshotTransition>,
}

impl CompositionSnapshot {
    pub fn end(&self) -> TimeMs {
        self.layers
            .iter()
            .flat_map(|l| l.clips.iter().map(|c| c.end))
            .max()
            .unwrap_or_default()
    }

    /// Every clip covering `t`, in composition order.
    pub fn layers_at(&self, t: TimeMs) -> Vec<ActiveClip> {
        let mut active = Vec::new();
        for layer in &self.layers {
            for clip in layer.clips.iter().filter(|c| c.start <= t && t < c.end) {
                active.push(ActiveClip {
                    track: layer.track,
                    clip: clip.id,
                    kind: clip.kind,
                    source_time: clip.start_offset + (t - clip.start),
                    muted: layer.muted,
                });
            }
        }
        active
    }

    pub fn transitions_at(&self, t: TimeMs) -> impl Iterator<Item = &SnapshotTransition> {
        self.transitions
            .iter()
            .filter(move |tr| tr.start <= t && t < tr.end)
    }
}

/// Shared, cheaply cloned access to the latest published snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle(Arc<RwLock<Arc<CompositionSnapshot>>>);

impl SnapshotHandle {
    pub fn load(&self) -> Arc<CompositionSnapshot> {
        let guard = self.0.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn publish(&self, snapshot: CompositionSnapshot) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }
}

// ---------------------------------------------------------------------------
// MemoryEngine
// ---------------------------------------------------------------------------

/// First id handed out by [`MemoryEngine`]; keeps engine ids visibly apart
/// from model ids.
pub const ENGINE_OVERLAP_BASE: i64 = 1 << 40;

#[derive(Debug, Clone)]
struct EngineTrack {
    id: TrackId,
    kind: TrackKind,
    muted: bool,
    visible: bool,
    locked: bool,
}

#[derive(Debug, Clone)]
struct EngineClip {
    id: ClipId,
    track: TrackId,
    kind: MediaKind,
    start: TimeMs,
    end: TimeMs,
    start_offset: TimeMs,
}

/// In-memory reference engine. Derives overlaps itself, with its own ids,
/// and publishes a [`CompositionSnapshot`] on every refresh.
#[derive(Debug)]
pub struct MemoryEngine {
    tracks: Vec<EngineTrack>,
    clips: HashMap<ClipId, EngineClip>,
    overlaps: BTreeMap<ClipPair, EngineOverlap>,
    next_overlap: i64,
    version: u64,
    published: SnapshotHandle,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            clips: HashMap::new(),
            overlaps: BTreeMap::new(),
            next_overlap: ENGINE_OVERLAP_BASE,
            version: 0,
            published: SnapshotHandle::default(),
        }
    }

    /// Handle readers use to load published snapshots.
    pub fn snapshots(&self) -> SnapshotHandle {
        self.published.clone()
    }

    pub fn track_order(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id).collect()
    }

    pub fn clip_range(&self, id: ClipId) -> Option<(TrackId, TimeMs, TimeMs)> {
        self.clips.get(&id).map(|c| (c.track, c.start, c.end))
    }

    pub fn overlap_for(&self, a: ClipId, b: ClipId) -> Option<&EngineOverlap> {
        self.overlaps.get(&ClipPair::new(a, b))
    }

    pub fn transition_for(&self, a: ClipId, b: ClipId) -> Option<&Transition> {
        self.overlaps.get(&ClipPair::new(a, b)).map(|e| &e.transition)
    }

    fn track_index(&self, id: TrackId) -> Result<usize, SyncError> {
        self.tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(SyncError::UnknownTrack(id))
    }

    /// Re-derive the overlaps of one track, keeping existing entries by pair.
    fn rebuild_overlaps(&mut self, track: TrackId) {
        let mut on_track: Vec<&EngineClip> =
            self.clips.values().filter(|c| c.track == track).collect();
        on_track.sort_by_key(|c| (c.start, c.id));

        let mut live: BTreeMap<ClipPair, (ClipId, ClipId, TimeMs, TimeMs)> = BTreeMap::new();
        for (i, a) in on_track.iter().enumerate() {
            for b in &on_track[i + 1..] {
                if b.start >= a.end {
                    break;
                }
                if let Some((start, end)) = intersection(a.start, a.end, b.start, b.end) {
                    live.insert(ClipPair::new(a.id, b.id), (a.id, b.id, start, end));
                }
            }
        }

        let clips = &self.clips;
        self.overlaps.retain(|pair, entry| {
            let touches_track = [entry.front, entry.rear]
                .iter()
                .any(|id| clips.get(id).is_none_or(|c| c.track == track));
            !touches_track || live.contains_key(pair)
        });

        for (pair, (front, rear, start, end)) in live {
            match self.overlaps.get_mut(&pair) {
                Some(entry) => {
                    entry.front = front;
                    entry.rear = rear;
                    entry.start = start;
                    entry.end = end;
                }
                None => {
                    let id = OverlapId(self.next_overlap);
                    self.next_overlap += 1;
                    self.overlaps.insert(
                        pair,
                        EngineOverlap {
                            id,
                            front,
                            rear,
                            start,
                            end,
                            transition: Transition::default(),
                        },
                    );
                }
            }
        }
    }

    fn snapshot(&self) -> CompositionSnapshot {
        let mut layers = Vec::new();
        for track in self.tracks.iter().filter(|t| t.visible) {
            let mut clips: Vec<SnapshotClip> = self
                .clips
                .values()
                .filter(|c| c.track == track.id)
                .map(|c| SnapshotClip {
                    id: c.id,
                    kind: c.kind,
                    start: c.start,
                    end: c.end,
                    start_offset: c.start_offset,
                })
                .collect();
            clips.sort_by_key(|c| (c.start, c.id));
            layers.push(SnapshotLayer {
                track: track.id,
                kind: track.kind,
                muted: track.muted,
                clips,
            });
        }
        let visible: Vec<TrackId> = layers.iter().map(|l| l.track).collect();
        let transitions = self
            .overlaps
            .values()
            .filter_map(|e| {
                let track = self.clips.get(&e.front)?.track;
                visible.contains(&track).then(|| SnapshotTransition {
                    id: e.id,
                    track,
                    start: e.start,
                    end: e.end,
                })
            })
            .collect();
        CompositionSnapshot {
            version: self.version,
            layers,
            transitions,
        }
    }
}

impl DataLayer for MemoryEngine {
    fn add_track(&mut self, track: &Track, index: usize) -> Result<(), SyncError> {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return Err(SyncError::Rejected(format!("track {} already exists", track.id)));
        }
        let index = index.min(self.tracks.len());
        self.tracks.insert(
            index,
            EngineTrack {
                id: track.id,
                kind: track.kind,
                muted: track.muted,
                visible: track.visible,
                locked: track.locked,
            },
        );
        Ok(())
    }

    fn remove_track(&mut self, track: TrackId) -> Result<(), SyncError> {
        let index = self.track_index(track)?;
        self.tracks.remove(index);
        self.clips.retain(|_, c| c.track != track);
        let clips = &self.clips;
        self.overlaps
            .retain(|_, e| clips.contains_key(&e.front) && clips.contains_key(&e.rear));
        Ok(())
    }

    fn move_track(&mut self, track: TrackId, index: usize) -> Result<(), SyncError> {
        let from = self.track_index(track)?;
        let moved = self.tracks.remove(from);
        let index = index.min(self.tracks.len());
        self.tracks.insert(index, moved);
        Ok(())
    }

    fn set_track_state(&mut self, track: TrackId, flag: TrackFlag) -> Result<(), SyncError> {
        let index = self.track_index(track)?;
        let entry = &mut self.tracks[index];
        match flag {
            TrackFlag::Muted(v) => entry.muted = v,
            TrackFlag::Visible(v) => entry.visible = v,
            TrackFlag::Locked(v) => entry.locked = v,
        }
        Ok(())
    }

    fn insert_clip(&mut self, clip: &Clip) -> Result<(), SyncError> {
        self.track_index(clip.track_id)?;
        if self.clips.contains_key(&clip.id) {
            return Err(SyncError::Rejected(format!("clip {} already exists", clip.id)));
        }
        self.clips.insert(
            clip.id,
            EngineClip {
                id: clip.id,
                track: clip.track_id,
                kind: clip.kind(),
                start: clip.start,
                end: clip.end,
                start_offset: clip.start_offset,
            },
        );
        self.rebuild_overlaps(clip.track_id);
        Ok(())
    }

    fn remove_clip(&mut self, track: TrackId, clip: ClipId) -> Result<(), SyncError> {
        match self.clips.get(&clip) {
            Some(c) if c.track == track => {}
            _ => return Err(SyncError::UnknownClip(clip)),
        }
        self.clips.remove(&clip);
        self.overlaps.retain(|pair, _| !pair.contains(clip));
        self.rebuild_overlaps(track);
        Ok(())
    }

    fn change_clip_range(&mut self, clip: ClipId, span: &ClipSpan) -> Result<(), SyncError> {
        let entry = self.clips.get_mut(&clip).ok_or(SyncError::UnknownClip(clip))?;
        entry.start = span.start;
        entry.end = span.end;
        entry.start_offset = span.start_offset;
        let track = entry.track;
        self.rebuild_overlaps(track);
        Ok(())
    }

    fn move_clip(&mut self, clip: ClipId, track: TrackId, start: TimeMs) -> Result<(), SyncError> {
        self.track_index(track)?;
        let entry = self.clips.get_mut(&clip).ok_or(SyncError::UnknownClip(clip))?;
        let from = entry.track;
        let length = entry.end - entry.start;
        entry.track = track;
        entry.start = start;
        entry.end = start + length;
        if from != track {
            self.overlaps.retain(|pair, _| !pair.contains(clip));
            self.rebuild_overlaps(from);
        }
        self.rebuild_overlaps(track);
        Ok(())
    }

    fn overlaps(&self) -> Vec<EngineOverlap> {
        self.overlaps.values().cloned().collect()
    }

    fn set_overlap_identity(
        &mut self,
        current: OverlapId,
        id: OverlapId,
        transition: &Transition,
    ) -> Result<(), SyncError> {
        let entry = self
            .overlaps
            .values_mut()
            .find(|e| e.id == current)
            .ok_or(SyncError::UnknownOverlap(current))?;
        entry.id = id;
        entry.transition = transition.clone();
        Ok(())
    }

    fn set_transition(
        &mut self,
        front: ClipId,
        rear: ClipId,
        transition: &Transition,
    ) -> Result<(), SyncError> {
        let entry = self
            .overlaps
            .get_mut(&ClipPair::new(front, rear))
            .ok_or(SyncError::MissingOverlap { front, rear })?;
        entry.transition = transition.clone();
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), SyncError> {
        self.version += 1;
        self.published.publish(self.snapshot());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
