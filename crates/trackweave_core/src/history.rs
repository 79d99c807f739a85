use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::clip::{Clip, ClipSpan};
use crate::error::{CoreError, Result};
use crate::group::ClipGroup;
use crate::overlap::{ClipPair, Overlap, Transition};
use crate::timeline::{Notification, Timeline};
use crate::track::Track;
use crate::types::*;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A track together with everything that goes away when it is removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackSnapshot {
    pub track: Track,
    #[serde(default)]
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub overlaps: Vec<Overlap>,
    /// Groups with at least one member on the track, as they were before.
    #[serde(default)]
    pub groups: Vec<ClipGroup>,
}

/// One atomic, invertible model mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    AddClip {
        media_type: MediaKind,
        track_id: TrackId,
        clip: Clip,
    },
    RemoveClip {
        media_type: MediaKind,
        track_id: TrackId,
        clip: Clip,
    },
    MoveClip {
        media_type: MediaKind,
        clip_id: ClipId,
        from_track: TrackId,
        to_track: TrackId,
        from_start: TimeMs,
        to_start: TimeMs,
    },
    CropClip {
        media_type: MediaKind,
        clip_id: ClipId,
        before: ClipSpan,
        after: ClipSpan,
    },
    CutClip {
        media_type: MediaKind,
        track_id: TrackId,
        clip_id: ClipId,
        before: ClipSpan,
        after: ClipSpan,
        new_clip: Clip,
    },
    UncutClip {
        media_type: MediaKind,
        track_id: TrackId,
        clip_id: ClipId,
        before: ClipSpan,
        after: ClipSpan,
        new_clip: Clip,
    },
    AddTrack {
        media_type: TrackKind,
        index: usize,
        snapshot: TrackSnapshot,
    },
    RemoveTrack {
        media_type: TrackKind,
        index: usize,
        snapshot: TrackSnapshot,
    },
    MoveTrack {
        media_type: TrackKind,
        track_id: TrackId,
        from: usize,
        to: usize,
    },
    MuteTrack {
        media_type: TrackKind,
        track_id: TrackId,
        muted: bool,
        previous: bool,
    },
    HideTrack {
        media_type: TrackKind,
        track_id: TrackId,
        visible: bool,
        previous: bool,
    },
    LockTrack {
        media_type: TrackKind,
        track_id: TrackId,
        locked: bool,
        previous: bool,
    },
    AddClipToGroup {
        clip_id: ClipId,
        group_id: GroupId,
        color: Color,
    },
    RemoveClipFromGroup {
        clip_id: ClipId,
        group_id: GroupId,
        color: Color,
    },
    AddGroup {
        group: ClipGroup,
    },
    RemoveGroup {
        group: ClipGroup,
    },
    SetTransition {
        front: ClipId,
        rear: ClipId,
        before: Transition,
        after: Transition,
    },
}

impl Action {
    /// The action that undoes this one.
    pub fn inverse(&self) -> Action {
        match self.clone() {
            Action::AddClip {
                media_type,
                track_id,
                clip,
            } => Action::RemoveClip {
                media_type,
                track_id,
                clip,
            },
            Action::RemoveClip {
                media_type,
                track_id,
                clip,
            } => Action::AddClip {
                media_type,
                track_id,
                clip,
            },
            Action::MoveClip {
                media_type,
                clip_id,
                from_track,
                to_track,
                from_start,
                to_start,
            } => Action::MoveClip {
                media_type,
                clip_id,
                from_track: to_track,
                to_track: from_track,
                from_start: to_start,
                to_start: from_start,
            },
            Action::CropClip {
                media_type,
                clip_id,
                before,
                after,
            } => Action::CropClip {
                media_type,
                clip_id,
                before: after,
                after: before,
            },
            Action::CutClip {
                media_type,
                track_id,
                clip_id,
                before,
                after,
                new_clip,
            } => Action::UncutClip {
                media_type,
                track_id,
                clip_id,
                before,
                after,
                new_clip,
            },
            Action::UncutClip {
                media_type,
                track_id,
                clip_id,
                before,
                after,
                new_clip,
            } => Action::CutClip {
                media_type,
                track_id,
                clip_id,
                before,
                after,
                new_clip,
            },
            Action::AddTrack {
                media_type,
                index,
                snapshot,
            } => Action::RemoveTrack {
                media_type,
                index,
                snapshot,
            },
            Action::RemoveTrack {
                media_type,
                index,
                snapshot,
            } => Action::AddTrack {
                media_type,
                index,
                snapshot,
            },
            Action::MoveTrack {
                media_type,
                track_id,
                from,
                to,
            } => Action::MoveTrack {
                media_type,
                track_id,
                from: to,
                to: from,
            },
            Action::MuteTrack {
                media_type,
                track_id,
                muted,
                previous,
            } => Action::MuteTrack {
                media_type,
                track_id,
                muted: previous,
                previous: muted,
            },
            Action::HideTrack {
                media_type,
                track_id,
                visible,
                previous,
            } => Action::HideTrack {
                media_type,
                track_id,
                visible: previous,
                previous: visible,
            },
            Action::LockTrack {
                media_type,
                track_id,
                locked,
                previous,
            } => Action::LockTrack {
                media_type,
                track_id,
                locked: previous,
                previous: locked,
            },
            Action::AddClipToGroup {
                clip_id,
                group_id,
                color,
            } => Action::RemoveClipFromGroup {
                clip_id,
                group_id,
                color,
            },
            Action::RemoveClipFromGroup {
                clip_id,
                group_id,
                color,
            } => Action::AddClipToGroup {
                clip_id,
                group_id,
                color,
            },
            Action::AddGroup { group } => Action::RemoveGroup { group },
            Action::RemoveGroup { group } => Action::AddGroup { group },
            Action::SetTransition {
                front,
                rear,
                before,
                after,
            } => Action::SetTransition {
                front,
                rear,
                before: after,
                after: before,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::AddClip { .. } => "add_clip",
            Action::RemoveClip { .. } => "remove_clip",
            Action::MoveClip { .. } => "move_clip",
            Action::CropClip { .. } => "crop_clip",
            Action::CutClip { .. } => "cut_clip",
            Action::UncutClip { .. } => "uncut_clip",
            Action::AddTrack { .. } => "add_track",
            Action::RemoveTrack { .. } => "remove_track",
            Action::MoveTrack { .. } => "move_track",
            Action::MuteTrack { .. } => "mute_track",
            Action::HideTrack { .. } => "hide_track",
            Action::LockTrack { .. } => "lock_track",
            Action::AddClipToGroup { .. } => "add_clip_to_group",
            Action::RemoveClipFromGroup { .. } => "remove_clip_from_group",
            Action::AddGroup { .. } => "add_group",
            Action::RemoveGroup { .. } => "remove_group",
            Action::SetTransition { .. } => "set_transition",
        }
    }

    /// Merge a follow-up drag record for the same clip into this one.
    /// Returns `false` when the two cannot be merged.
    fn absorb(&mut self, next: &Action) -> bool {
        match (self, next) {
            (
                Action::MoveClip {
                    clip_id,
                    to_track,
                    to_start,
                    ..
                },
                Action::MoveClip {
                    clip_id: next_id,
                    from_track: next_from,
                    to_track: next_to,
                    to_start: next_start,
                    ..
                },
            ) if clip_id == next_id && to_track == next_from => {
                *to_track = *next_to;
                *to_start = *next_start;
                true
            }
            (
                Action::CropClip { clip_id, after, .. },
                Action::CropClip {
                    clip_id: next_id,
                    after: next_after,
                    ..
                },
            ) if clip_id == next_id => {
                *after = next_after.clone();
                true
            }
            _ => false,
        }
    }

    /// Clip touched by an in-place move or crop record.
    fn drag_target(&self) -> Option<ClipId> {
        match self {
            Action::MoveClip {
                clip_id,
                from_track,
                to_track,
                ..
            } if from_track == to_track => Some(*clip_id),
            Action::CropClip { clip_id, .. } => Some(*clip_id),
            _ => None,
        }
    }

    fn is_noop(&self) -> bool {
        match self {
            Action::MoveClip {
                from_track,
                to_track,
                from_start,
                to_start,
                ..
            } => from_track == to_track && from_start == to_start,
            Action::CropClip { before, after, .. } => before == after,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryEntry
// ---------------------------------------------------------------------------

/// The records of one user gesture, plus the overlaps it changed so their
/// identity and transitions can be put back exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub description: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub overlaps_before: Vec<Overlap>,
    #[serde(default)]
    pub overlaps_after: Vec<Overlap>,
}

impl HistoryEntry {
    fn new(description: String, actions: Vec<Action>, before: Vec<Overlap>, after: Vec<Overlap>) -> Self {
        let before_by_id: HashMap<OverlapId, &Overlap> = before.iter().map(|o| (o.id, o)).collect();
        let after_by_id: HashMap<OverlapId, &Overlap> = after.iter().map(|o| (o.id, o)).collect();
        let overlaps_before = before
            .iter()
            .filter(|o| after_by_id.get(&o.id) != Some(o))
            .cloned()
            .collect();
        let overlaps_after = after
            .iter()
            .filter(|o| before_by_id.get(&o.id) != Some(o))
            .cloned()
            .collect();
        Self {
            description,
            actions,
            overlaps_before,
            overlaps_after,
        }
    }
}

/// Records collected since the last commit.
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    actions: Vec<Action>,
    overlaps_before: Vec<Overlap>,
}

impl PendingBatch {
    pub(crate) fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn begin(&mut self, overlaps: Vec<Overlap>) {
        self.actions.clear();
        self.overlaps_before = overlaps;
    }

    /// Append `action`, folding it into an earlier drag record of the same
    /// clip when only drags of other clips lie in between.
    pub(crate) fn record(&mut self, action: Action) {
        for i in (0..self.actions.len()).rev() {
            let earlier = &mut self.actions[i];
            if earlier.absorb(&action) {
                if earlier.is_noop() {
                    self.actions.remove(i);
                }
                return;
            }
            match (earlier.drag_target(), action.drag_target()) {
                (Some(a), Some(b)) if a != b => continue,
                _ => break,
            }
        }
        self.actions.push(action);
    }

    pub(crate) fn actions(&self) -> &[Action] {
        &self.actions
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Linear undo/redo history.
///
/// Entries before the cursor can be undone, entries at or after it redone.
/// Pushing an entry drops the redo tail.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    cursor: usize,
    max_size: usize,
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            max_size: max_size.max(1),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.truncate(self.cursor);
        self.entries.push(entry);
        if self.entries.len() > self.max_size {
            self.entries.remove(0);
        }
        self.cursor = self.entries.len();
    }

    /// Entry the next undo would revert.
    fn undo_entry(&self) -> Result<&HistoryEntry> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .ok_or(CoreError::NothingToUndo)
    }

    /// Entry the next redo would replay.
    fn redo_entry(&self) -> Result<&HistoryEntry> {
        self.entries.get(self.cursor).ok_or(CoreError::NothingToRedo)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|e| e.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries.get(self.cursor).map(|e| e.description.as_str())
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

impl Timeline {
    /// Apply `action` and record it into the pending batch.
    pub(crate) fn execute(&mut self, action: Action) -> Result<()> {
        if self.pending.is_empty() {
            let snapshot = self.overlaps.sorted().into_iter().cloned().collect();
            self.pending.begin(snapshot);
        }
        self.apply_action(&action)?;
        self.pending.record(action);
        Ok(())
    }

    /// Close the pending batch into a history entry. Returns `false` if
    /// nothing was recorded since the last commit.
    pub fn commit(&mut self, description: impl Into<String>) -> bool {
        self.snapper.reset();
        if self.pending.is_empty() {
            return false;
        }
        let batch = std::mem::take(&mut self.pending);
        let after: Vec<Overlap> = self.overlaps.sorted().into_iter().cloned().collect();
        let entry = HistoryEntry::new(description.into(), batch.actions, batch.overlaps_before, after);
        tracing::debug!(
            description = %entry.description,
            actions = entry.actions.len(),
            "history entry committed"
        );
        self.history.push(entry);
        true
    }

    pub fn pending_actions(&self) -> &[Action] {
        self.pending.actions()
    }

    pub fn undo(&mut self) -> Result<()> {
        self.commit("Edit");
        let entry = self.history.undo_entry()?.clone();
        let inverses: Vec<Action> = entry.actions.iter().rev().map(Action::inverse).collect();
        self.replay(&inverses, &entry.overlaps_before)?;
        self.history.cursor -= 1;
        tracing::debug!(description = %entry.description, "undo");
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        self.commit("Edit");
        let entry = self.history.redo_entry()?.clone();
        self.replay(&entry.actions, &entry.overlaps_after)?;
        self.history.cursor += 1;
        tracing::debug!(description = %entry.description, "redo");
        Ok(())
    }

    /// Apply `actions` in order with overlap maintenance after each one, then
    /// put back the recorded overlap identities. If an action fails, the
    /// ones already applied are reverted and the model is left as it was.
    fn replay(&mut self, actions: &[Action], overlaps: &[Overlap]) -> Result<()> {
        let before: Vec<Overlap> = self.overlaps.sorted().into_iter().cloned().collect();
        for (i, action) in actions.iter().enumerate() {
            if let Err(err) = self.apply_action(action) {
                tracing::error!(action = action.name(), %err, "replay failed, rolling back");
                for applied in actions[..i].iter().rev() {
                    if let Err(undo_err) = self.apply_action(&applied.inverse()) {
                        tracing::error!(action = applied.name(), %undo_err, "rollback step failed");
                    }
                    self.flush();
                }
                self.update();
                self.restore_overlaps(&before);
                return Err(err);
            }
            self.flush();
        }
        self.update();
        self.restore_overlaps(overlaps);
        self.notify(Notification::RefreshPreview);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.pending.is_empty() || self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.pending.is_empty() && self.history.can_redo()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.history.undo_description()
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.history.redo_description()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Put overlap ids and transitions back as recorded, matching each
    /// snapshot to the live overlap of the same clip pair.
    pub(crate) fn restore_overlaps(&mut self, snapshot: &[Overlap]) {
        if snapshot.is_empty() {
            return;
        }
        let live: HashMap<ClipPair, OverlapId> =
            self.overlaps.iter().map(|o| (o.pair(), o.id)).collect();
        for recorded in snapshot {
            let Some(&current) = live.get(&recorded.pair()) else {
                tracing::warn!(overlap = %recorded.id, "no live overlap to restore");
                continue;
            };
            let Some(track_id) = self.clips.get(recorded.front).map(|c| c.track_id) else {
                continue;
            };
            if current != recorded.id && self.overlaps.contains(recorded.id) {
                tracing::warn!(overlap = %recorded.id, "overlap id already in use");
                continue;
            }
            self.overlaps.remove(current);
            let mut restored = recorded.clone();
            if let Some((start, end)) = self.pair_intersection(recorded) {
                restored.start = start;
                restored.end = end;
            }
            self.overlaps.insert(restored);
            if let Some(track) = self.tracks.get_mut(track_id) {
                for id in track.overlaps.iter_mut() {
                    if *id == current {
                        *id = recorded.id;
                    }
                }
                let overlaps = &self.overlaps;
                track
                    .overlaps
                    .sort_by_key(|&oid| (overlaps.get(oid).map(|o| o.start).unwrap_or_default(), oid));
            }
        }
    }

    fn pair_intersection(&self, recorded: &Overlap) -> Option<(TimeMs, TimeMs)> {
        let a = self.clips.get(recorded.front)?;
        let b = self.clips.get(recorded.rear)?;
        crate::overlap::intersection(a.start, a.end, b.start, b.end)
    }

    /// Apply one action to the model without recording it. Undo and redo
    /// go through here as well as every public edit.
    pub(crate) fn apply_action(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::AddClip { track_id, clip, .. } => {
                let mut clip = clip.clone();
                clip.track_id = *track_id;
                self.attach_clip(clip)?;
                self.touch_track(*track_id);
            }
            Action::RemoveClip { clip, .. } => {
                let removed = self.detach_clip(clip.id)?;
                self.touch_track(removed.track_id);
            }
            Action::MoveClip {
                clip_id,
                from_track,
                to_track,
                to_start,
                ..
            } => {
                if !self.tracks.contains(*to_track) {
                    return Err(CoreError::TrackNotFound(*to_track));
                }
                let clip = self
                    .clips
                    .get_mut(*clip_id)
                    .ok_or(CoreError::ClipNotFound(*clip_id))?;
                let diff = *to_start - clip.start;
                clip.shift(diff);
                if from_track != to_track {
                    clip.track_id = *to_track;
                    if let Some(source) = self.tracks.get_mut(*from_track) {
                        source.remove_clip(*clip_id);
                    }
                    if let Some(dest) = self.tracks.get_mut(*to_track) {
                        dest.insert_clip(*clip_id, &self.clips);
                    }
                    self.touch_track(*from_track);
                }
                self.touch_track(*to_track);
            }
            Action::CropClip { clip_id, after, .. } => {
                let clip = self
                    .clips
                    .get_mut(*clip_id)
                    .ok_or(CoreError::ClipNotFound(*clip_id))?;
                clip.set_span(after);
                let track_id = clip.track_id;
                self.touch_track(track_id);
            }
            Action::CutClip {
                track_id,
                clip_id,
                after,
                new_clip,
                ..
            } => {
                let clip = self
                    .clips
                    .get_mut(*clip_id)
                    .ok_or(CoreError::ClipNotFound(*clip_id))?;
                clip.set_span(after);
                let pos = new_clip.start;
                self.attach_clip(new_clip.clone())?;
                for overlap in self.overlaps.iter_mut() {
                    if overlap.references(*clip_id) && overlap.start >= pos {
                        overlap.repoint(*clip_id, new_clip.id);
                    }
                }
                self.touch_track(*track_id);
            }
            Action::UncutClip {
                track_id,
                clip_id,
                before,
                new_clip,
                ..
            } => {
                self.detach_clip(new_clip.id)?;
                for overlap in self.overlaps.iter_mut() {
                    if overlap.references(new_clip.id) {
                        overlap.repoint(new_clip.id, *clip_id);
                    }
                }
                let clip = self
                    .clips
                    .get_mut(*clip_id)
                    .ok_or(CoreError::ClipNotFound(*clip_id))?;
                clip.set_span(before);
                self.touch_track(*track_id);
            }
            Action::AddTrack {
                index, snapshot, ..
            } => {
                self.restore_track(*index, snapshot)?;
                self.touch_track(snapshot.track.id);
            }
            Action::RemoveTrack { snapshot, .. } => {
                self.detach_track(snapshot.track.id)?;
            }
            Action::MoveTrack {
                track_id, from, to, ..
            } => {
                if self.track_order.get(*from) != Some(track_id) {
                    return Err(CoreError::InvalidOperation(format!(
                        "track {track_id} is not at index {from}"
                    )));
                }
                self.track_order.remove(*from);
                let to = (*to).min(self.track_order.len());
                self.track_order.insert(to, *track_id);
            }
            Action::MuteTrack {
                track_id, muted, ..
            } => self.track_mut(*track_id)?.muted = *muted,
            Action::HideTrack {
                track_id, visible, ..
            } => self.track_mut(*track_id)?.visible = *visible,
            Action::LockTrack {
                track_id, locked, ..
            } => self.track_mut(*track_id)?.locked = *locked,
            Action::AddClipToGroup {
                clip_id,
                group_id,
                color,
            } => {
                let clip = self
                    .clips
                    .get_mut(*clip_id)
                    .ok_or(CoreError::ClipNotFound(*clip_id))?;
                clip.group_id = Some(*group_id);
                if !self.groups.contains(*group_id) {
                    self.groups.insert(ClipGroup::new(*group_id, *color));
                    self.ids.observe(group_id.0);
                }
                if let Some(group) = self.groups.get_mut(*group_id) {
                    group.insert(*clip_id);
                }
            }
            Action::RemoveClipFromGroup {
                clip_id, group_id, ..
            } => {
                if let Some(clip) = self.clips.get_mut(*clip_id) {
                    if clip.group_id == Some(*group_id) {
                        clip.group_id = None;
                    }
                }
                let group = self
                    .groups
                    .get_mut(*group_id)
                    .ok_or(CoreError::GroupNotFound(*group_id))?;
                group.remove(*clip_id);
                if group.is_empty() {
                    self.groups.remove(*group_id);
                }
            }
            Action::AddGroup { group } => {
                for &member in &group.members {
                    let clip = self
                        .clips
                        .get_mut(member)
                        .ok_or(CoreError::ClipNotFound(member))?;
                    clip.group_id = Some(group.id);
                }
                self.ids.observe(group.id.0);
                self.groups.insert(group.clone());
            }
            Action::RemoveGroup { group } => {
                let removed = self
                    .groups
                    .remove(group.id)
                    .ok_or(CoreError::GroupNotFound(group.id))?;
                for member in removed.members {
                    if let Some(clip) = self.clips.get_mut(member) {
                        clip.group_id = None;
                    }
                }
            }
            Action::SetTransition {
                front, rear, after, ..
            } => {
                let pair = ClipPair::new(*front, *rear);
                let overlap = self
                    .overlaps
                    .iter_mut()
                    .find(|o| o.pair() == pair)
                    .ok_or_else(|| {
                        CoreError::InvalidOperation(format!("no overlap between {front} and {rear}"))
                    })?;
                overlap.transition = after.clone();
            }
        }
        self.recompute_range();
        self.bridge.project(action);
        self.notify(Notification::RefreshPreview);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipContent;
    use crate::time::FrameRate;

    fn make_test_timeline() -> (Timeline, TrackId) {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let track = tl.new_track(TrackKind::Video, None);
        tl.commit("Add track");
        (tl, track)
    }

    fn add_video(tl: &mut Timeline, track: TrackId, start: i64, end: i64) -> ClipId {
        tl.add_clip(
            track,
            ClipContent::video(TimeMs(end - start)),
            TimeMs(start),
            TimeMs(end),
        )
        .unwrap()
        .unwrap()
    }

    // -----------------------------------------------------------------------
    // AddClip + undo/redo
    // -----------------------------------------------------------------------

    #[test]
    fn add_undo_redo() {
        let (mut tl, track) = make_test_timeline();
        let clip = add_video(&mut tl, track, 0, 5_000);
        tl.commit("Add clip");
        assert_eq!(tl.track(track).unwrap().clips.len(), 1);

        // Undo: clip removed
        tl.undo().unwrap();
        assert!(tl.track(track).unwrap().clips.is_empty());
        assert!(tl.clip(clip).is_err());

        // Redo: clip restored under the same id
        tl.redo().unwrap();
        assert_eq!(tl.track(track).unwrap().clips, vec![clip]);
    }

    // -----------------------------------------------------------------------
    // New entry clears redo tail
    // -----------------------------------------------------------------------

    #[test]
    fn new_entry_clears_redo() {
        let (mut tl, track) = make_test_timeline();
        add_video(&mut tl, track, 0, 5_000);
        tl.commit("Add clip");

        tl.undo().unwrap();
        assert!(tl.can_redo());

        add_video(&mut tl, track, 10_000, 13_000);
        tl.commit("Add clip");
        assert!(!tl.can_redo());
    }

    // -----------------------------------------------------------------------
    // Empty history
    // -----------------------------------------------------------------------

    #[test]
    fn undo_empty_history_errors() {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let result = tl.undo();
        assert!(matches!(result.unwrap_err(), CoreError::NothingToUndo));
    }

    #[test]
    fn redo_empty_stack_errors() {
        let (mut tl, _) = make_test_timeline();
        let result = tl.redo();
        assert!(matches!(result.unwrap_err(), CoreError::NothingToRedo));
    }

    // -----------------------------------------------------------------------
    // Descriptions
    // -----------------------------------------------------------------------

    #[test]
    fn descriptions_follow_cursor() {
        let (mut tl, track) = make_test_timeline();
        add_video(&mut tl, track, 0, 5_000);
        tl.commit("Add clip");
        assert_eq!(tl.undo_description(), Some("Add clip"));
        assert_eq!(tl.redo_description(), None);

        tl.undo().unwrap();
        assert_eq!(tl.undo_description(), Some("Add track"));
        assert_eq!(tl.redo_description(), Some("Add clip"));
    }

    #[test]
    fn max_size_drops_oldest() {
        let mut history = History::new(2);
        for name in ["a", "b", "c"] {
            history.push(HistoryEntry::new(name.into(), vec![], vec![], vec![]));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries()[0].description, "b");
        assert_eq!(history.undo_description(), Some("c"));
    }

    // -----------------------------------------------------------------------
    // Inverse
    // -----------------------------------------------------------------------

    #[test]
    fn inverse_is_an_involution() {
        let action = Action::MoveClip {
            media_type: MediaKind::Video,
            clip_id: ClipId(3),
            from_track: TrackId(1),
            to_track: TrackId(2),
            from_start: TimeMs(0),
            to_start: TimeMs(1_000),
        };
        assert_eq!(action.inverse().inverse(), action);
        match action.inverse() {
            Action::MoveClip {
                from_track,
                to_start,
                ..
            } => {
                assert_eq!(from_track, TrackId(2));
                assert_eq!(to_start, TimeMs(0));
            }
            other => panic!("unexpected inverse {other:?}"),
        }
    }

    #[test]
    fn action_record_is_tagged_json() {
        let action = Action::MuteTrack {
            media_type: TrackKind::Audio,
            track_id: TrackId(4),
            muted: true,
            previous: false,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "mute_track");
        assert_eq!(json["media_type"], "audio");
        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
        assert_eq!(back.name(), "mute_track");
    }

    // -----------------------------------------------------------------------
    // Coalescing
    // -----------------------------------------------------------------------

    #[test]
    fn consecutive_moves_of_one_clip_coalesce() {
        let mut batch = PendingBatch::default();
        let step = |from: i64, to: i64| Action::MoveClip {
            media_type: MediaKind::Video,
            clip_id: ClipId(1),
            from_track: TrackId(1),
            to_track: TrackId(1),
            from_start: TimeMs(from),
            to_start: TimeMs(to),
        };
        batch.record(step(0, 40));
        batch.record(step(40, 120));
        assert_eq!(batch.actions(), &[step(0, 120)]);

        // Returning to the origin leaves nothing to undo.
        batch.record(step(120, 0));
        assert!(batch.is_empty());
    }

    // -----------------------------------------------------------------------
    // Overlap identity across undo/redo
    // -----------------------------------------------------------------------

    #[test]
    fn redo_restores_overlap_identity_and_transition() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 5_000);
        let b = add_video(&mut tl, track, 4_000, 9_000);
        tl.commit("Add clips");
        let overlap_id = tl.track(track).unwrap().overlaps[0];

        let transition = Transition {
            keyframes: vec![crate::overlap::Keyframe {
                param: "opacity".into(),
                time: TimeMs(0),
                value: 0.5,
            }],
            ..Transition::default()
        };
        tl.set_transition(overlap_id, transition.clone()).unwrap();
        tl.commit("Set transition");

        // Pull the clips apart, then undo: the overlap comes back as it was.
        tl.move_clip(b, TimeMs(2_000), true, crate::editing::DropTarget::Same).unwrap();
        tl.commit("Move clip");
        assert!(tl.track(track).unwrap().overlaps.is_empty());

        tl.undo().unwrap();
        let restored = tl.overlap(overlap_id).unwrap();
        assert_eq!(restored.pair(), ClipPair::new(a, b));
        assert_eq!(restored.transition, transition);

        tl.redo().unwrap();
        assert!(tl.overlap(overlap_id).is_err());
        tl.undo().unwrap();
        assert_eq!(tl.track(track).unwrap().overlaps, vec![overlap_id]);
    }

    #[test]
    fn remove_track_undo_restores_cascade() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 5_000);
        let b = add_video(&mut tl, track, 4_000, 9_000);
        let group = tl.group_clips(&[a, b]).unwrap().unwrap();
        tl.commit("Setup");
        let before_overlaps: Vec<Overlap> = tl.overlaps().cloned().collect();

        assert!(tl.remove_track(track).unwrap());
        tl.commit("Remove track");
        assert!(tl.clip(a).is_err());
        assert!(tl.group(group).is_err());
        assert!(tl.overlaps().next().is_none());

        tl.undo().unwrap();
        assert_eq!(tl.track(track).unwrap().clips, vec![a, b]);
        assert_eq!(tl.group(group).unwrap().len(), 2);
        assert_eq!(tl.clip(b).unwrap().group_id, Some(group));
        let after_overlaps: Vec<Overlap> = tl.overlaps().cloned().collect();
        assert_eq!(before_overlaps, after_overlaps);
    }

    fn fade() -> Transition {
        Transition {
            keyframes: vec![crate::overlap::Keyframe {
                param: "opacity".into(),
                time: TimeMs(0),
                value: 0.25,
            }],
            ..Transition::default()
        }
    }

    fn unsnapped_timeline() -> (Timeline, TrackId) {
        let config = crate::config::EditConfig {
            magnetic_snap: false,
            ..crate::config::EditConfig::default()
        };
        let mut tl = Timeline::with_config(FrameRate::FPS_25, config);
        let track = tl.new_track(TrackKind::Video, None);
        tl.commit("Add track");
        (tl, track)
    }

    #[test]
    fn redo_sets_transition_on_overlap_created_by_same_gesture() {
        let (mut tl, track) = unsnapped_timeline();
        let a = tl
            .add_clip(track, ClipContent::video(TimeMs(8_000)), TimeMs(0), TimeMs(5_000))
            .unwrap()
            .unwrap();
        let b = add_video(&mut tl, track, 5_000, 7_000);
        tl.commit("Add clips");

        tl.crop_clip(a, TimeMs(400), Edge::End).unwrap();
        let overlap_id = tl.overlap_between(a, b).unwrap().id;
        tl.set_transition(overlap_id, fade()).unwrap();
        tl.commit("Crossfade");
        let after = tl.to_document().unwrap();

        tl.undo().unwrap();
        assert!(tl.overlap_between(a, b).is_none());
        assert_eq!(tl.clip(a).unwrap().end, TimeMs(5_000));

        tl.redo().unwrap();
        let overlap = tl.overlap_between(a, b).unwrap();
        assert_eq!(overlap.id, overlap_id);
        assert_eq!(overlap.transition, fade());
        assert!(tl.validate().is_empty());
        let mut redone = tl.to_document().unwrap();
        redone.id_generate_state = after.id_generate_state;
        assert_eq!(redone, after);
    }

    #[test]
    fn undo_resets_transition_before_clips_come_apart() {
        let (mut tl, track) = unsnapped_timeline();
        let a = add_video(&mut tl, track, 0, 5_000);
        let b = add_video(&mut tl, track, 4_000, 9_000);
        tl.commit("Add clips");
        let overlap_id = tl.overlap_between(a, b).unwrap().id;

        tl.set_transition(overlap_id, fade()).unwrap();
        tl.move_clip(b, TimeMs(2_000), true, crate::editing::DropTarget::Same)
            .unwrap();
        tl.commit("Fade and move");
        assert!(tl.overlap_between(a, b).is_none());

        tl.undo().unwrap();
        let restored = tl.overlap_between(a, b).unwrap();
        assert_eq!(restored.id, overlap_id);
        assert_eq!(restored.transition, Transition::default());
        assert!(tl.validate().is_empty());

        tl.redo().unwrap();
        assert!(tl.overlap_between(a, b).is_none());
        assert_eq!(tl.clip(b).unwrap().start, TimeMs(6_000));
    }

    #[test]
    fn failed_redo_leaves_model_and_cursor_untouched() {
        let (mut tl, track) = unsnapped_timeline();
        let a = add_video(&mut tl, track, 0, 5_000);
        let b = add_video(&mut tl, track, 4_000, 9_000);
        tl.commit("Add clips");
        let overlap_id = tl.overlap_between(a, b).unwrap().id;
        let before = tl.to_document().unwrap();

        let shift = |clip_id: ClipId, from: i64, to: i64| Action::MoveClip {
            media_type: MediaKind::Video,
            clip_id,
            from_track: track,
            to_track: track,
            from_start: TimeMs(from),
            to_start: TimeMs(to),
        };
        tl.history.push(HistoryEntry::new(
            "Broken".into(),
            vec![shift(b, 4_000, 6_000), shift(ClipId(999), 0, 1_000)],
            vec![],
            vec![],
        ));
        tl.history.cursor -= 1;
        let cursor = tl.history().cursor();

        let err = tl.redo().unwrap_err();
        assert!(matches!(err, CoreError::ClipNotFound(ClipId(999))));
        assert_eq!(tl.history().cursor(), cursor);
        assert!(tl.can_redo());
        assert_eq!(tl.clip(b).unwrap().start, TimeMs(4_000));
        assert_eq!(tl.overlap_between(a, b).unwrap().id, overlap_id);
        assert!(tl.validate().is_empty());
        let mut after = tl.to_document().unwrap();
        after.id_generate_state = before.id_generate_state;
        assert_eq!(after, before);
    }
}
