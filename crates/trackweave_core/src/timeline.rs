use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use crate::arena::Arena;
use crate::clip::{Clip, ClipContent};
use crate::config::EditConfig;
use crate::error::{CoreError, Result};
use crate::group::ClipGroup;
use crate::history::{Action, History, PendingBatch, TrackSnapshot};
use crate::overlap::{intersection, ClipPair, Overlap, Transition};
use crate::snapping::Snapper;
use crate::sync::{DataLayer, SyncBridge, SyncReport};
use crate::time::{AlignMode, FrameRate};
use crate::track::{exceeds_double_coverage, Track};
use crate::types::*;

/// Fired after mutation for the rendering layer to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RefreshPreview,
    RefreshTrackView(TrackId),
    /// A media clip was added; its thumbnails or waveform can be built
    /// whenever the caller gets to it.
    OverviewRequested { clip: ClipId, path: PathBuf },
}

/// Owns every track, clip, overlap and group of one edited project and
/// serializes all mutation through itself.
#[derive(Debug)]
pub struct Timeline {
    pub(crate) tracks: Arena<Track>,
    /// Composition z-order.
    pub(crate) track_order: Vec<TrackId>,
    pub(crate) clips: Arena<Clip>,
    pub(crate) overlaps: Arena<Overlap>,
    pub(crate) groups: Arena<ClipGroup>,
    pub(crate) ids: IdGenerator,
    pub(crate) frame_rate: FrameRate,
    pub(crate) config: EditConfig,
    pub(crate) start: TimeMs,
    pub(crate) end: TimeMs,
    pub(crate) current_time: TimeMs,
    pub(crate) mark_in: Option<TimeMs>,
    pub(crate) mark_out: Option<TimeMs>,
    pub(crate) selection: BTreeSet<ClipId>,
    /// Pixels per millisecond of the editing view.
    pub(crate) view_scale: f64,
    pub(crate) history: History,
    pub(crate) pending: PendingBatch,
    pub(crate) bridge: SyncBridge,
    pub(crate) snapper: Snapper,
    /// Tracks whose overlaps need maintenance before the next read.
    dirty: BTreeSet<TrackId>,
    notifications: Vec<Notification>,
}

impl Timeline {
    pub fn new(frame_rate: FrameRate) -> Self {
        Self::with_config(frame_rate, EditConfig::default())
    }

    pub fn with_config(frame_rate: FrameRate, config: EditConfig) -> Self {
        Self {
            tracks: Arena::new(),
            track_order: Vec::new(),
            clips: Arena::new(),
            overlaps: Arena::new(),
            groups: Arena::new(),
            ids: IdGenerator::new(),
            frame_rate,
            history: History::new(config.history_depth),
            config,
            start: TimeMs::ZERO,
            end: TimeMs::ZERO,
            current_time: TimeMs::ZERO,
            mark_in: None,
            mark_out: None,
            selection: BTreeSet::new(),
            view_scale: 0.1,
            pending: PendingBatch::default(),
            bridge: SyncBridge::default(),
            snapper: Snapper::default(),
            dirty: BTreeSet::new(),
            notifications: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    /// Changing the rate does not move existing boundaries; run
    /// [`Timeline::validate`] to find clips left off the new grid.
    pub fn set_frame_rate(&mut self, frame_rate: FrameRate) {
        self.frame_rate = frame_rate;
    }

    pub fn config(&self) -> &EditConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EditConfig) {
        self.config = config;
    }

    pub fn id_state(&self) -> i64 {
        self.ids.state()
    }

    pub fn view_scale(&self) -> f64 {
        self.view_scale
    }

    pub fn set_view_scale(&mut self, pixels_per_ms: f64) {
        if pixels_per_ms > 0.0 {
            self.view_scale = pixels_per_ms;
        }
    }

    // -----------------------------------------------------------------------
    // Range, playhead and marks
    // -----------------------------------------------------------------------

    /// `[min start, max end)` over all clips; empty timelines span nothing.
    pub fn range(&self) -> (TimeMs, TimeMs) {
        (self.start, self.end)
    }

    pub fn duration(&self) -> TimeMs {
        self.end - self.start
    }

    pub(crate) fn recompute_range(&mut self) {
        let mut clips = self.clips.iter();
        let Some(first) = clips.next() else {
            self.start = TimeMs::ZERO;
            self.end = TimeMs::ZERO;
            return;
        };
        let (start, end) = clips.fold((first.start, first.end), |(s, e), c| {
            (s.min(c.start), e.max(c.end))
        });
        self.start = start;
        self.end = end;
    }

    pub fn current_time(&self) -> TimeMs {
        self.current_time
    }

    pub fn set_current_time(&mut self, t: TimeMs) {
        self.current_time = self.frame_rate.align(t.max(TimeMs::ZERO), AlignMode::Round);
        self.notify(Notification::RefreshPreview);
    }

    pub fn mark_in(&self) -> Option<TimeMs> {
        self.mark_in
    }

    pub fn mark_out(&self) -> Option<TimeMs> {
        self.mark_out
    }

    /// Set or clear the marks. A pair given in the wrong order is swapped.
    pub fn set_marks(&mut self, mark_in: Option<TimeMs>, mark_out: Option<TimeMs>) {
        let align = |t: TimeMs| self.frame_rate.align(t.max(TimeMs::ZERO), AlignMode::Round);
        let (mut a, mut b) = (mark_in.map(align), mark_out.map(align));
        if let (Some(i), Some(o)) = (a, b) {
            if i > o {
                (a, b) = (Some(o), Some(i));
            }
        }
        self.mark_in = a;
        self.mark_out = b;
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn clip(&self, id: ClipId) -> Result<&Clip> {
        self.clips.get(id).ok_or(CoreError::ClipNotFound(id))
    }

    pub fn track(&self, id: TrackId) -> Result<&Track> {
        self.tracks.get(id).ok_or(CoreError::TrackNotFound(id))
    }

    pub fn overlap(&self, id: OverlapId) -> Result<&Overlap> {
        self.overlaps.get(id).ok_or(CoreError::OverlapNotFound(id))
    }

    pub fn group(&self, id: GroupId) -> Result<&ClipGroup> {
        self.groups.get(id).ok_or(CoreError::GroupNotFound(id))
    }

    pub(crate) fn track_mut(&mut self, id: TrackId) -> Result<&mut Track> {
        self.tracks.get_mut(id).ok_or(CoreError::TrackNotFound(id))
    }

    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.clips.iter()
    }

    /// Tracks in composition order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.track_order.iter().filter_map(|&id| self.tracks.get(id))
    }

    pub fn track_ids(&self) -> &[TrackId] {
        &self.track_order
    }

    pub fn track_index(&self, id: TrackId) -> Option<usize> {
        self.track_order.iter().position(|&t| t == id)
    }

    pub fn overlaps(&self) -> impl Iterator<Item = &Overlap> {
        self.overlaps.iter()
    }

    pub fn groups(&self) -> impl Iterator<Item = &ClipGroup> {
        self.groups.iter()
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn overlap_between(&self, a: ClipId, b: ClipId) -> Option<&Overlap> {
        let pair = ClipPair::new(a, b);
        self.overlaps.iter().find(|o| o.pair() == pair)
    }

    /// Clips of a track in start order.
    pub fn clips_on(&self, track: TrackId) -> Result<Vec<&Clip>> {
        let track = self.track(track)?;
        Ok(track
            .clips
            .iter()
            .filter_map(|&id| self.clips.get(id))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    pub(crate) fn notify(&mut self, notification: Notification) {
        if !self.notifications.contains(&notification) {
            self.notifications.push(notification);
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // -----------------------------------------------------------------------
    // Tracks
    // -----------------------------------------------------------------------

    /// Append (or insert at `index`) an empty track named after its kind.
    pub fn new_track(&mut self, kind: TrackKind, index: Option<usize>) -> TrackId {
        let id = self.ids.next_track();
        let ordinal = self.tracks.iter().filter(|t| t.kind == kind).count() + 1;
        let prefix = match kind {
            TrackKind::Video => "V",
            TrackKind::Audio => "A",
            TrackKind::Text => "T",
        };
        let index = index
            .unwrap_or(self.track_order.len())
            .min(self.track_order.len());
        let snapshot = TrackSnapshot {
            track: Track::new(id, kind, format!("{prefix}{ordinal}")),
            clips: Vec::new(),
            overlaps: Vec::new(),
            groups: Vec::new(),
        };
        if let Err(err) = self.execute(Action::AddTrack {
            media_type: kind,
            index,
            snapshot,
        }) {
            tracing::error!(track = %id, %err, "failed to add track");
        }
        self.flush();
        id
    }

    /// Remove a track with its clips, their overlaps and group memberships.
    /// Locked tracks are left alone.
    pub fn remove_track(&mut self, id: TrackId) -> Result<bool> {
        if self.track(id)?.locked {
            return Ok(false);
        }
        let (index, snapshot) = self.track_snapshot(id)?;
        self.execute(Action::RemoveTrack {
            media_type: snapshot.track.kind,
            index,
            snapshot,
        })?;
        self.flush();
        Ok(true)
    }

    /// Change a track's composition position.
    pub fn move_track(&mut self, id: TrackId, to: usize) -> Result<bool> {
        let kind = self.track(id)?.kind;
        let from = self.track_index(id).ok_or(CoreError::TrackNotFound(id))?;
        let to = to.min(self.track_order.len().saturating_sub(1));
        if from == to {
            return Ok(false);
        }
        self.execute(Action::MoveTrack {
            media_type: kind,
            track_id: id,
            from,
            to,
        })?;
        self.flush();
        Ok(true)
    }

    pub fn set_track_muted(&mut self, id: TrackId, muted: bool) -> Result<bool> {
        let track = self.track(id)?;
        if track.muted == muted {
            return Ok(false);
        }
        let media_type = track.kind;
        self.execute(Action::MuteTrack {
            media_type,
            track_id: id,
            muted,
            previous: !muted,
        })?;
        Ok(true)
    }

    pub fn set_track_visible(&mut self, id: TrackId, visible: bool) -> Result<bool> {
        let track = self.track(id)?;
        if track.visible == visible {
            return Ok(false);
        }
        let media_type = track.kind;
        self.execute(Action::HideTrack {
            media_type,
            track_id: id,
            visible,
            previous: !visible,
        })?;
        Ok(true)
    }

    pub fn set_track_locked(&mut self, id: TrackId, locked: bool) -> Result<bool> {
        let track = self.track(id)?;
        if track.locked == locked {
            return Ok(false);
        }
        let media_type = track.kind;
        self.execute(Action::LockTrack {
            media_type,
            track_id: id,
            locked,
            previous: !locked,
        })?;
        Ok(true)
    }

    pub fn rename_track(&mut self, id: TrackId, name: impl Into<String>) -> Result<()> {
        self.track_mut(id)?.name = name.into();
        self.notify(Notification::RefreshTrackView(id));
        Ok(())
    }

    pub fn set_track_expanded(&mut self, id: TrackId, expanded: bool) -> Result<()> {
        self.track_mut(id)?.expanded = expanded;
        self.notify(Notification::RefreshTrackView(id));
        Ok(())
    }

    pub(crate) fn track_snapshot(&self, id: TrackId) -> Result<(usize, TrackSnapshot)> {
        let track = self.track(id)?.clone();
        let index = self.track_index(id).ok_or(CoreError::TrackNotFound(id))?;
        let clips: Vec<Clip> = track
            .clips
            .iter()
            .filter_map(|&c| self.clips.get(c).cloned())
            .collect();
        let overlaps = track
            .overlaps
            .iter()
            .filter_map(|&o| self.overlaps.get(o).cloned())
            .collect();
        let group_ids: BTreeSet<GroupId> = clips.iter().filter_map(|c| c.group_id).collect();
        let groups = group_ids
            .into_iter()
            .filter_map(|g| self.groups.get(g).cloned())
            .collect();
        Ok((
            index,
            TrackSnapshot {
                track,
                clips,
                overlaps,
                groups,
            },
        ))
    }

    pub(crate) fn restore_track(&mut self, index: usize, snapshot: &TrackSnapshot) -> Result<()> {
        let id = snapshot.track.id;
        if self.tracks.contains(id) {
            return Err(CoreError::InvalidOperation(format!(
                "track {id} already exists"
            )));
        }
        self.ids.observe(id.0);
        self.tracks.insert(snapshot.track.clone());
        let index = index.min(self.track_order.len());
        self.track_order.insert(index, id);
        for clip in &snapshot.clips {
            self.ids.observe(clip.id.0);
            self.clips.insert(clip.clone());
        }
        for overlap in &snapshot.overlaps {
            self.ids.observe(overlap.id.0);
            self.overlaps.insert(overlap.clone());
        }
        for group in &snapshot.groups {
            self.ids.observe(group.id.0);
            self.groups.insert(group.clone());
        }
        Ok(())
    }

    pub(crate) fn detach_track(&mut self, id: TrackId) -> Result<()> {
        let index = self.track_index(id).ok_or(CoreError::TrackNotFound(id))?;
        let track = self.tracks.remove(id).ok_or(CoreError::TrackNotFound(id))?;
        self.track_order.remove(index);
        for &clip in &track.clips {
            if let Some(removed) = self.clips.remove(clip) {
                self.drop_membership(&removed);
            }
            self.selection.remove(&clip);
        }
        for &overlap in &track.overlaps {
            self.overlaps.remove(overlap);
        }
        self.dirty.remove(&id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Clips
    // -----------------------------------------------------------------------

    /// Place new content on a track at `[start, end)`, aligned to the nearest
    /// frames. Returns `None` when the track is locked or the aligned range
    /// is empty.
    pub fn add_clip(
        &mut self,
        track: TrackId,
        content: ClipContent,
        start: TimeMs,
        end: TimeMs,
    ) -> Result<Option<ClipId>> {
        let clip = Clip::new(ClipId(0), track, content, start, end);
        self.insert_clip(track, clip)
    }

    /// Insert a prepared clip under a fresh id. Group membership is not
    /// carried over.
    pub fn insert_clip(&mut self, track_id: TrackId, mut clip: Clip) -> Result<Option<ClipId>> {
        let track = self.track(track_id)?;
        let kind = clip.kind();
        if !track.accepts(kind) {
            return Err(CoreError::IncompatibleTrack {
                track: track_id,
                kind: kind.to_string(),
            });
        }
        if track.locked {
            return Ok(None);
        }

        let start = self.frame_rate.align(clip.start, AlignMode::Round);
        let mut end = self.frame_rate.align(start + clip.length(), AlignMode::Round);
        if clip.is_trimmable() {
            // Never reach past the end of the source.
            let available = clip.length() + clip.end_offset;
            if end - start > available {
                end = self.frame_rate.align(start + available, AlignMode::Floor);
            }
            clip.end_offset = available - (end - start);
        }
        if start < TimeMs::ZERO || end <= start {
            return Ok(None);
        }
        clip.start = start;
        clip.end = end;
        clip.track_id = track_id;
        clip.group_id = None;
        if self.exceeds_end_bound(end) || !self.fits_on_track(track_id, start, end, &HashSet::new()) {
            return Err(CoreError::OverlapDetected);
        }

        clip.id = self.ids.next_clip();
        clip.check_invariants()?;
        let id = clip.id;
        self.execute(Action::AddClip {
            media_type: kind,
            track_id,
            clip,
        })?;
        self.flush();
        Ok(Some(id))
    }

    /// Remove a clip, leaving its group first. Clips on locked tracks stay.
    pub fn remove_clip(&mut self, id: ClipId) -> Result<bool> {
        let track_id = self.clip(id)?.track_id;
        if self.track(track_id)?.locked {
            return Ok(false);
        }
        self.leave_group(id)?;
        let clip = self.clip(id)?.clone();
        self.execute(Action::RemoveClip {
            media_type: clip.kind(),
            track_id,
            clip,
        })?;
        self.flush();
        Ok(true)
    }

    pub(crate) fn attach_clip(&mut self, clip: Clip) -> Result<()> {
        let id = clip.id;
        let group_id = clip.group_id;
        let track = self
            .tracks
            .get_mut(clip.track_id)
            .ok_or(CoreError::TrackNotFound(clip.track_id))?;
        self.ids.observe(id.0);
        self.clips.insert(clip);
        track.insert_clip(id, &self.clips);
        if let Some(group_id) = group_id {
            match self.groups.get_mut(group_id) {
                Some(group) => {
                    group.insert(id);
                }
                None => {
                    if let Some(clip) = self.clips.get_mut(id) {
                        clip.group_id = None;
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn detach_clip(&mut self, id: ClipId) -> Result<Clip> {
        let clip = self.clips.remove(id).ok_or(CoreError::ClipNotFound(id))?;
        if let Some(track) = self.tracks.get_mut(clip.track_id) {
            track.remove_clip(id);
        }
        self.drop_membership(&clip);
        self.selection.remove(&id);
        Ok(clip)
    }

    fn drop_membership(&mut self, clip: &Clip) {
        let Some(group_id) = clip.group_id else {
            return;
        };
        if let Some(group) = self.groups.get_mut(group_id) {
            group.remove(clip.id);
            if group.is_empty() {
                self.groups.remove(group_id);
            }
        }
    }

    /// Whether `[start, end)` can join the track without stacking an
    /// overlap on another overlap. Clips in `ignore` are left out.
    pub(crate) fn fits_on_track(
        &self,
        track: TrackId,
        start: TimeMs,
        end: TimeMs,
        ignore: &HashSet<ClipId>,
    ) -> bool {
        if !self.config.reject_stacked_overlaps {
            return true;
        }
        let Some(track) = self.tracks.get(track) else {
            return false;
        };
        let mut ranges: Vec<(TimeMs, TimeMs)> = track
            .clips
            .iter()
            .filter(|id| !ignore.contains(id))
            .filter_map(|&id| self.clips.get(id))
            .map(|c| (c.start, c.end))
            .collect();
        ranges.push((start, end));
        !exceeds_double_coverage(&ranges)
    }

    pub(crate) fn exceeds_end_bound(&self, end: TimeMs) -> bool {
        self.config.max_timeline_end.is_some_and(|max| end > max)
    }

    // -----------------------------------------------------------------------
    // Event stacks
    // -----------------------------------------------------------------------

    /// Add an event to a clip's stack; times are relative to the clip start.
    pub fn add_clip_event(
        &mut self,
        clip: ClipId,
        start: TimeMs,
        end: TimeMs,
        z: i32,
    ) -> Result<Option<EventId>> {
        let start = self.frame_rate.align(start, AlignMode::Round);
        let end = self.frame_rate.align(end, AlignMode::Round);
        let result = self.edit_events(clip, |events, length| events.add(start, end, z, length))?;
        Ok(result.flatten())
    }

    pub fn remove_clip_event(&mut self, clip: ClipId, event: EventId) -> Result<bool> {
        let removed = self.edit_events(clip, |events, _| events.remove(event))?;
        Ok(removed.flatten().is_some())
    }

    /// Slide an event inside its clip. Returns the applied delta.
    pub fn move_clip_event(&mut self, clip: ClipId, event: EventId, diff: TimeMs) -> Result<TimeMs> {
        let applied = self.edit_events(clip, |events, length| events.move_event(event, diff, length))?;
        Ok(applied.unwrap_or_default())
    }

    /// Move one edge of an event, keeping it at least one frame long.
    pub fn crop_clip_event(
        &mut self,
        clip: ClipId,
        event: EventId,
        diff: TimeMs,
        edge: Edge,
    ) -> Result<TimeMs> {
        let min_length = TimeMs((self.frame_rate.frame_duration_ms().ceil() as i64).max(1));
        let applied = self.edit_events(clip, |events, length| {
            events.crop_event(event, diff, edge, length, min_length)
        })?;
        Ok(applied.unwrap_or_default())
    }

    /// Run `edit` on a copy of the clip's events and journal the result as
    /// a span change. `None` means the clip was not editable.
    fn edit_events<T>(
        &mut self,
        id: ClipId,
        edit: impl FnOnce(&mut crate::events::EventStack, TimeMs) -> T,
    ) -> Result<Option<T>> {
        let clip = self.clip(id)?;
        if clip.dummy || self.track(clip.track_id)?.locked {
            return Ok(None);
        }
        let before = clip.span();
        let mut after = before.clone();
        let result = edit(&mut after.events, clip.length());
        if after != before {
            let media_type = clip.kind();
            self.execute(Action::CropClip {
                media_type,
                clip_id: id,
                before,
                after,
            })?;
            self.flush();
        }
        Ok(Some(result))
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Put the clips into a fresh group, taking them out of any group they
    /// were in. Fewer than two clips do not make a group.
    pub fn group_clips(&mut self, clips: &[ClipId]) -> Result<Option<GroupId>> {
        let members: BTreeSet<ClipId> = clips.iter().copied().collect();
        for &clip in &members {
            self.clip(clip)?;
        }
        if members.len() < 2 {
            return Ok(None);
        }
        for &clip in &members {
            self.leave_group(clip)?;
        }
        let id = self.ids.next_group();
        let mut group = ClipGroup::new(id, Color::for_group(id));
        group.members = members;
        self.execute(Action::AddGroup { group })?;
        Ok(Some(id))
    }

    pub fn add_clip_to_group(&mut self, clip: ClipId, group: GroupId) -> Result<bool> {
        let color = self.group(group)?.color;
        if self.clip(clip)?.group_id == Some(group) {
            return Ok(false);
        }
        self.leave_group(clip)?;
        self.execute(Action::AddClipToGroup {
            clip_id: clip,
            group_id: group,
            color,
        })?;
        Ok(true)
    }

    /// Take a clip out of its group; the group goes away once empty.
    pub fn remove_clip_from_group(&mut self, clip: ClipId) -> Result<bool> {
        self.leave_group(clip)
    }

    /// Dissolve a group, keeping its clips.
    pub fn ungroup(&mut self, group: GroupId) -> Result<()> {
        let group = self.group(group)?.clone();
        self.execute(Action::RemoveGroup { group })
    }

    pub(crate) fn leave_group(&mut self, clip: ClipId) -> Result<bool> {
        let Some(group_id) = self.clip(clip)?.group_id else {
            return Ok(false);
        };
        let color = self.group(group_id)?.color;
        self.execute(Action::RemoveClipFromGroup {
            clip_id: clip,
            group_id,
            color,
        })?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Select a clip together with the rest of its group.
    pub fn select_clip(&mut self, id: ClipId, additive: bool) -> Result<()> {
        let group = self.clip(id)?.group_id;
        if !additive {
            self.selection.clear();
        }
        self.selection.insert(id);
        if let Some(group) = group.and_then(|g| self.groups.get(g)) {
            self.selection.extend(group.members.iter().copied());
        }
        self.notify(Notification::RefreshPreview);
        Ok(())
    }

    pub fn deselect_clip(&mut self, id: ClipId) -> bool {
        self.selection.remove(&id)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> &BTreeSet<ClipId> {
        &self.selection
    }

    pub fn is_selected(&self, id: ClipId) -> bool {
        self.selection.contains(&id)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    pub fn set_transition(&mut self, overlap: OverlapId, transition: Transition) -> Result<()> {
        let overlap = self.overlap(overlap)?;
        if overlap.transition == transition {
            return Ok(());
        }
        let action = Action::SetTransition {
            front: overlap.front,
            rear: overlap.rear,
            before: overlap.transition.clone(),
            after: transition,
        };
        self.execute(action)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub(crate) fn touch_track(&mut self, id: TrackId) {
        self.dirty.insert(id);
    }

    /// Run overlap maintenance on tracks touched since the last flush.
    pub(crate) fn flush(&mut self) {
        for id in std::mem::take(&mut self.dirty) {
            self.update_track(id);
            self.notify(Notification::RefreshTrackView(id));
        }
        self.recompute_range();
    }

    /// Re-sort every track, rebuild its overlaps and recompute the range.
    pub fn update(&mut self) {
        self.dirty.clear();
        for id in self.track_order.clone() {
            self.update_track(id);
        }
        self.recompute_range();
    }

    fn update_track(&mut self, id: TrackId) {
        let Some(track) = self.tracks.get_mut(id) else {
            return;
        };
        let changes = track.update_overlaps(&self.clips, &mut self.overlaps, &mut self.ids);
        if !changes.is_empty() {
            tracing::debug!(
                track = %id,
                created = changes.created.len(),
                removed = changes.removed.len(),
                "overlaps changed"
            );
            self.notify(Notification::RefreshTrackView(id));
        }
    }

    // -----------------------------------------------------------------------
    // Data layer
    // -----------------------------------------------------------------------

    /// Mirror the model onto `layer` and keep it updated from now on.
    pub fn attach_data_layer(&mut self, layer: Box<dyn DataLayer>) {
        let tracks: Vec<&Track> = self
            .track_order
            .iter()
            .filter_map(|&id| self.tracks.get(id))
            .collect();
        self.bridge.attach(layer, &tracks, &self.clips);
    }

    pub fn detach_data_layer(&mut self) -> Option<Box<dyn DataLayer>> {
        self.bridge.detach()
    }

    /// Reconcile overlap identity with the data layer and publish its state.
    pub fn synchronize(&mut self) -> SyncReport {
        self.flush();
        self.bridge.reconcile(&self.overlaps)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Every cross-entity invariant violation, or an empty list.
    pub fn validate(&self) -> Vec<CoreError> {
        let mut problems = Vec::new();
        let mut owner: HashMap<ClipId, TrackId> = HashMap::new();

        for track in self.tracks() {
            for &id in &track.clips {
                let Some(clip) = self.clips.get(id) else {
                    problems.push(CoreError::Invariant(format!(
                        "track {} lists missing clip {id}",
                        track.id
                    )));
                    continue;
                };
                if owner.insert(id, track.id).is_some() {
                    problems.push(CoreError::Invariant(format!(
                        "clip {id} is listed by more than one track"
                    )));
                }
                if clip.track_id != track.id {
                    problems.push(CoreError::Invariant(format!(
                        "clip {id} points at track {} but sits on {}",
                        clip.track_id, track.id
                    )));
                }
                if !track.accepts(clip.kind()) {
                    problems.push(CoreError::IncompatibleTrack {
                        track: track.id,
                        kind: clip.kind().to_string(),
                    });
                }
            }
            let starts: Vec<(TimeMs, ClipId)> = track
                .clips
                .iter()
                .filter_map(|&id| self.clips.get(id))
                .map(|c| (c.start, c.id))
                .collect();
            if starts.windows(2).any(|w| w[0].0 > w[1].0) {
                problems.push(CoreError::Invariant(format!(
                    "track {} clips are out of order",
                    track.id
                )));
            }
            self.validate_track_overlaps(track, &mut problems);
        }

        for clip in self.clips.sorted() {
            if let Err(err) = clip.check_invariants() {
                problems.push(err);
            }
            if !owner.contains_key(&clip.id) {
                problems.push(CoreError::Invariant(format!(
                    "clip {} is on no track",
                    clip.id
                )));
            }
            if !self.frame_rate.is_aligned(clip.start) || !self.frame_rate.is_aligned(clip.end) {
                problems.push(CoreError::Invariant(format!(
                    "clip {} [{}, {}) is off the frame grid",
                    clip.id, clip.start.0, clip.end.0
                )));
            }
            if clip
                .events
                .iter()
                .any(|e| e.start < TimeMs::ZERO || e.end > clip.length() || e.start >= e.end)
            {
                problems.push(CoreError::Invariant(format!(
                    "clip {} has events outside its range",
                    clip.id
                )));
            }
            if let Some(group_id) = clip.group_id {
                if !self.groups.get(group_id).is_some_and(|g| g.contains(clip.id)) {
                    problems.push(CoreError::Invariant(format!(
                        "clip {} claims group {group_id} which does not list it",
                        clip.id
                    )));
                }
            }
        }

        for group in self.groups.sorted() {
            if group.is_empty() {
                problems.push(CoreError::Invariant(format!("group {} is empty", group.id)));
            }
            for &member in &group.members {
                if self.clips.get(member).map(|c| c.group_id) != Some(Some(group.id)) {
                    problems.push(CoreError::Invariant(format!(
                        "group {} lists clip {member} which does not point back",
                        group.id
                    )));
                }
            }
        }

        if self.track_order.len() != self.tracks.len() {
            problems.push(CoreError::Invariant(
                "track order and track set disagree".to_string(),
            ));
        }
        problems
    }

    fn validate_track_overlaps(&self, track: &Track, problems: &mut Vec<CoreError>) {
        let clips: Vec<&Clip> = track
            .clips
            .iter()
            .filter_map(|&id| self.clips.get(id))
            .collect();
        let mut expected: HashMap<ClipPair, (TimeMs, TimeMs)> = HashMap::new();
        for (i, a) in clips.iter().enumerate() {
            for b in &clips[i + 1..] {
                if let Some(range) = intersection(a.start, a.end, b.start, b.end) {
                    expected.insert(ClipPair::new(a.id, b.id), range);
                }
            }
        }
        let mut seen: HashSet<ClipPair> = HashSet::new();
        for &oid in &track.overlaps {
            let Some(overlap) = self.overlaps.get(oid) else {
                problems.push(CoreError::OverlapNotFound(oid));
                continue;
            };
            let pair = overlap.pair();
            match expected.get(&pair) {
                Some(&(start, end)) if (overlap.start, overlap.end) == (start, end) => {}
                Some(_) => problems.push(CoreError::Invariant(format!(
                    "overlap {oid} range is stale"
                ))),
                None => problems.push(CoreError::Invariant(format!(
                    "overlap {oid} joins clips that do not intersect on track {}",
                    track.id
                ))),
            }
            if !seen.insert(pair) {
                problems.push(CoreError::Invariant(format!(
                    "overlap {oid} duplicates another overlap"
                )));
            }
        }
        for pair in expected.keys() {
            if !seen.contains(pair) {
                problems.push(CoreError::Invariant(format!(
                    "intersecting clips {pair:?} on track {} have no overlap",
                    track.id
                )));
            }
        }
        if self.config.reject_stacked_overlaps {
            let ranges: Vec<(TimeMs, TimeMs)> = clips.iter().map(|c| (c.start, c.end)).collect();
            if exceeds_double_coverage(&ranges) {
                problems.push(CoreError::Invariant(format!(
                    "track {} stacks overlaps",
                    track.id
                )));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_timeline() -> (Timeline, TrackId) {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let track = tl.new_track(TrackKind::Video, None);
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
    // Tracks
    // -----------------------------------------------------------------------

    #[test]
    fn new_tracks_are_named_per_kind() {
        let (mut tl, v1) = make_test_timeline();
        let a1 = tl.new_track(TrackKind::Audio, None);
        let v2 = tl.new_track(TrackKind::Video, Some(0));
        assert_eq!(tl.track(v1).unwrap().name, "V1");
        assert_eq!(tl.track(a1).unwrap().name, "A1");
        assert_eq!(tl.track(v2).unwrap().name, "V2");
        assert_eq!(tl.track_ids(), &[v2, v1, a1]);
    }

    #[test]
    fn move_track_reorders_and_undoes() {
        let (mut tl, v1) = make_test_timeline();
        let a1 = tl.new_track(TrackKind::Audio, None);
        tl.commit("Setup");
        assert!(tl.move_track(a1, 0).unwrap());
        tl.commit("Move track");
        assert_eq!(tl.track_ids(), &[a1, v1]);
        tl.undo().unwrap();
        assert_eq!(tl.track_ids(), &[v1, a1]);
        assert!(!tl.move_track(v1, 0).unwrap());
    }

    #[test]
    fn track_flags_are_journaled() {
        let (mut tl, track) = make_test_timeline();
        tl.commit("Setup");
        assert!(tl.set_track_muted(track, true).unwrap());
        assert!(!tl.set_track_muted(track, true).unwrap());
        assert!(tl.set_track_visible(track, false).unwrap());
        tl.commit("Mute and hide");
        let t = tl.track(track).unwrap();
        assert!(t.muted && !t.visible);

        tl.undo().unwrap();
        let t = tl.track(track).unwrap();
        assert!(!t.muted && t.visible);
    }

    #[test]
    fn unknown_track_is_an_error() {
        let (mut tl, _) = make_test_timeline();
        let result = tl.remove_track(TrackId(999));
        assert!(matches!(result, Err(CoreError::TrackNotFound(TrackId(999)))));
    }

    // -----------------------------------------------------------------------
    // Clips
    // -----------------------------------------------------------------------

    #[test]
    fn add_clip_aligns_and_tracks_range() {
        let (mut tl, track) = make_test_timeline();
        let id = tl
            .add_clip(
                track,
                ClipContent::video(TimeMs(10_000)),
                TimeMs(1_010),
                TimeMs(5_000),
            )
            .unwrap()
            .unwrap();
        let clip = tl.clip(id).unwrap();
        assert_eq!((clip.start, clip.end), (TimeMs(1_000), TimeMs(5_000)));
        assert_eq!(clip.end_offset, TimeMs(6_000));
        assert!(clip.check_invariants().is_ok());
        assert_eq!(tl.range(), (TimeMs(1_000), TimeMs(5_000)));
    }

    #[test]
    fn add_clip_never_reaches_past_the_source() {
        let (mut tl, track) = make_test_timeline();
        let id = add_video(&mut tl, track, 1_010, 5_000);
        let clip = tl.clip(id).unwrap();
        assert_eq!((clip.start, clip.end), (TimeMs(1_000), TimeMs(4_960)));
        assert_eq!(clip.end_offset, TimeMs(30));
        assert!(clip.check_invariants().is_ok());
    }

    #[test]
    fn add_clip_to_wrong_kind_fails() {
        let (mut tl, track) = make_test_timeline();
        let result = tl.add_clip(track, ClipContent::audio(TimeMs(1_000)), TimeMs(0), TimeMs(1_000));
        assert!(matches!(result, Err(CoreError::IncompatibleTrack { .. })));
    }

    #[test]
    fn add_clip_on_locked_track_is_a_no_op() {
        let (mut tl, track) = make_test_timeline();
        tl.set_track_locked(track, true).unwrap();
        let result = tl
            .add_clip(track, ClipContent::video(TimeMs(1_000)), TimeMs(0), TimeMs(1_000))
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn stacking_a_third_clip_is_rejected() {
        let (mut tl, track) = make_test_timeline();
        add_video(&mut tl, track, 0, 5_000);
        add_video(&mut tl, track, 4_000, 9_000);
        let result = tl.add_clip(
            track,
            ClipContent::video(TimeMs(1_000)),
            TimeMs(4_200),
            TimeMs(5_200),
        );
        assert!(matches!(result, Err(CoreError::OverlapDetected)));
    }

    #[test]
    fn intersecting_clips_share_one_overlap() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 5_000);
        let b = add_video(&mut tl, track, 4_000, 9_000);
        let overlap = tl.overlap_between(a, b).unwrap();
        assert_eq!((overlap.start, overlap.end), (TimeMs(4_000), TimeMs(5_000)));
        assert_eq!(overlap.front, a);
        assert_eq!(tl.overlaps().count(), 1);
        assert!(tl.validate().is_empty());
    }

    #[test]
    fn remove_clip_drops_overlap_and_group() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 5_000);
        let b = add_video(&mut tl, track, 4_000, 9_000);
        let group = tl.group_clips(&[a, b]).unwrap().unwrap();
        tl.commit("Setup");

        assert!(tl.remove_clip(b).unwrap());
        tl.commit("Remove clip");
        assert!(tl.overlaps().next().is_none());
        assert_eq!(tl.group(group).unwrap().len(), 1);
        assert!(tl.validate().is_empty());

        tl.undo().unwrap();
        assert_eq!(tl.clip(b).unwrap().group_id, Some(group));
        assert_eq!(tl.group(group).unwrap().len(), 2);
        assert!(tl.overlap_between(a, b).is_some());
        assert!(tl.validate().is_empty());
    }

    // -----------------------------------------------------------------------
    // Groups and selection
    // -----------------------------------------------------------------------

    #[test]
    fn empty_group_is_deleted() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 1_000);
        let b = add_video(&mut tl, track, 2_000, 3_000);
        let group = tl.group_clips(&[a, b]).unwrap().unwrap();
        assert!(tl.remove_clip_from_group(a).unwrap());
        assert!(tl.remove_clip_from_group(b).unwrap());
        assert!(tl.group(group).is_err());
        assert!(!tl.remove_clip_from_group(b).unwrap());
    }

    #[test]
    fn regrouping_moves_membership() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 1_000);
        let b = add_video(&mut tl, track, 2_000, 3_000);
        let c = add_video(&mut tl, track, 4_000, 5_000);
        let first = tl.group_clips(&[a, b]).unwrap().unwrap();
        let second = tl.group_clips(&[b, c]).unwrap().unwrap();
        assert_eq!(tl.clip(b).unwrap().group_id, Some(second));
        assert_eq!(tl.group(first).unwrap().members.len(), 1);
        assert!(tl.add_clip_to_group(a, second).unwrap());
        assert!(tl.group(first).is_err());
        assert_eq!(tl.group(second).unwrap().len(), 3);
        assert!(tl.validate().is_empty());
    }

    #[test]
    fn selecting_a_clip_selects_its_group() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 1_000);
        let b = add_video(&mut tl, track, 2_000, 3_000);
        let c = add_video(&mut tl, track, 4_000, 5_000);
        tl.group_clips(&[a, b]).unwrap();
        tl.select_clip(a, false).unwrap();
        assert!(tl.is_selected(b));
        assert!(!tl.is_selected(c));
        tl.select_clip(c, false).unwrap();
        assert_eq!(tl.selection().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[test]
    fn event_edits_are_undoable() {
        let (mut tl, track) = make_test_timeline();
        let clip = add_video(&mut tl, track, 0, 10_000);
        tl.commit("Setup");
        let event = tl
            .add_clip_event(clip, TimeMs(1_000), TimeMs(2_000), 0)
            .unwrap()
            .unwrap();
        let applied = tl.move_clip_event(clip, event, TimeMs(500)).unwrap();
        assert_eq!(applied, TimeMs(500));
        tl.commit("Add event");
        let e = tl.clip(clip).unwrap().events.get(event).unwrap();
        assert_eq!((e.start, e.end), (TimeMs(1_500), TimeMs(2_500)));

        tl.undo().unwrap();
        assert!(tl.clip(clip).unwrap().events.is_empty());
    }

    // -----------------------------------------------------------------------
    // Marks, notifications, validation
    // -----------------------------------------------------------------------

    #[test]
    fn marks_are_aligned_and_ordered() {
        let (mut tl, _) = make_test_timeline();
        tl.set_marks(Some(TimeMs(5_010)), Some(TimeMs(1_000)));
        assert_eq!(tl.mark_in(), Some(TimeMs(1_000)));
        assert_eq!(tl.mark_out(), Some(TimeMs(5_000)));
        tl.set_current_time(TimeMs(-30));
        assert_eq!(tl.current_time(), TimeMs::ZERO);
    }

    #[test]
    fn mutations_emit_refresh_notifications() {
        let (mut tl, track) = make_test_timeline();
        tl.take_notifications();
        add_video(&mut tl, track, 0, 1_000);
        let notifications = tl.take_notifications();
        assert!(notifications.contains(&Notification::RefreshPreview));
        assert!(notifications.contains(&Notification::RefreshTrackView(track)));
        assert!(tl.take_notifications().is_empty());
    }

    #[test]
    fn validate_reports_broken_membership() {
        let (mut tl, track) = make_test_timeline();
        let a = add_video(&mut tl, track, 0, 1_000);
        tl.clips.get_mut(a).unwrap().group_id = Some(GroupId(77));
        let problems = tl.validate();
        assert_eq!(problems.len(), 1);
        assert!(matches!(problems[0], CoreError::Invariant(_)));
    }
}
