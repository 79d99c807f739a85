use std::collections::{BTreeSet, HashSet};

use crate::error::Result;
use crate::group::ClipGroup;
use crate::history::Action;
use crate::snapping::collect_snap_points;
use crate::time::AlignMode;
use crate::timeline::Timeline;
use crate::track::exceeds_double_coverage;
use crate::types::*;

/// Where the dragged clip should end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropTarget {
    #[default]
    Same,
    Track(TrackId),
    /// A track synthesized at `index` in composition order.
    NewTrack { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoveOutcome {
    /// Delta applied to every clip of the moving set; zero if nothing moved.
    pub delta: TimeMs,
    /// Track the dragged clip was relocated to.
    pub relocated_to: Option<TrackId>,
}

impl Timeline {
    /// Crop one edge of a clip. Returns the applied delta; zero means the
    /// crop was refused (placeholder, locked track, degenerate range or a
    /// stacked overlap).
    pub fn crop_clip(&mut self, id: ClipId, diff: TimeMs, edge: Edge) -> Result<TimeMs> {
        let clip = self.clip(id)?.clone();
        if clip.dummy || diff.is_zero() || self.track(clip.track_id)?.locked {
            return Ok(TimeMs::ZERO);
        }
        let mut cropped = clip.clone();
        let applied = cropped.crop(diff, edge, self.frame_rate);
        if applied.is_zero() {
            return Ok(TimeMs::ZERO);
        }
        let ignore: HashSet<ClipId> = [id].into();
        if self.exceeds_end_bound(cropped.end)
            || !self.fits_on_track(clip.track_id, cropped.start, cropped.end, &ignore)
        {
            return Ok(TimeMs::ZERO);
        }
        self.execute(Action::CropClip {
            media_type: clip.kind(),
            clip_id: id,
            before: clip.span(),
            after: cropped.span(),
        })?;
        self.flush();
        Ok(applied)
    }

    /// Drag a clip by `diff`, together with the selection unless `single`.
    ///
    /// The delta is snapped, aligned, checked against the clip layout of
    /// every touched track and clamped to the timeline bounds before it is
    /// applied. Only the dragged clip follows `target` to another track.
    pub fn move_clip(
        &mut self,
        id: ClipId,
        diff: TimeMs,
        single: bool,
        target: DropTarget,
    ) -> Result<MoveOutcome> {
        let dragged = self.clip(id)?.clone();
        if dragged.dummy || self.track(dragged.track_id)?.locked {
            return Ok(MoveOutcome::default());
        }

        let moving = self.moving_set(id, single);
        let clips: Vec<_> = moving.iter().filter_map(|&c| self.clips.get(c)).collect();
        let min_start = clips.iter().map(|c| c.start).min().unwrap_or(dragged.start);
        let max_end = clips.iter().map(|c| c.end).max().unwrap_or(dragged.end);
        let edges: Vec<TimeMs> = clips.iter().flat_map(|c| [c.start, c.end]).collect();

        let mut diff = diff;
        if self.config.magnetic_snap {
            let moving_ids: HashSet<ClipId> = moving.iter().copied().collect();
            let points = collect_snap_points(self, &moving_ids);
            let threshold = self.config.snap_threshold(self.view_scale);
            let ratio = self.config.snap_release_ratio;
            diff = self.snapper.adjust(diff, &edges, &points, threshold, ratio);
        }
        if !diff.is_zero() {
            diff = self.frame_rate.align(dragged.start + diff, AlignMode::Round) - dragged.start;
        }
        if min_start + diff < TimeMs::ZERO {
            diff = -min_start;
        }
        if let Some(max) = self.config.max_timeline_end {
            if max_end + diff > max {
                let limit = self.frame_rate.align(max - max_end + dragged.start, AlignMode::Floor);
                diff = (limit - dragged.start).max(-min_start);
            }
        }
        if !diff.is_zero() && !self.simulate_move(&moving, diff) {
            tracing::trace!(clip = %id, diff = diff.0, "move refused: overlaps would stack");
            self.snapper.reset();
            diff = TimeMs::ZERO;
        }

        for &clip_id in &moving {
            if diff.is_zero() {
                break;
            }
            let Some(clip) = self.clips.get(clip_id) else {
                continue;
            };
            let action = Action::MoveClip {
                media_type: clip.kind(),
                clip_id,
                from_track: clip.track_id,
                to_track: clip.track_id,
                from_start: clip.start,
                to_start: clip.start + diff,
            };
            self.execute(action)?;
        }

        let relocated_to = self.relocate(id, target)?;
        self.flush();
        Ok(MoveOutcome {
            delta: diff,
            relocated_to,
        })
    }

    /// Close the current drag gesture into one history entry.
    pub fn finish_move(&mut self) -> bool {
        self.commit("Move clips")
    }

    /// The dragged clip plus the selection and its own group, minus
    /// placeholders and clips on locked tracks.
    fn moving_set(&self, id: ClipId, single: bool) -> BTreeSet<ClipId> {
        let mut moving: BTreeSet<ClipId> = [id].into();
        if !single {
            moving.extend(self.selection.iter().copied());
            let group = self.clips.get(id).and_then(|c| c.group_id);
            if let Some(group) = group.and_then(|g| self.groups.get(g)) {
                moving.extend(group.members.iter().copied());
            }
        }
        moving.retain(|&c| {
            self.clips.get(c).is_some_and(|clip| {
                !clip.dummy && self.tracks.get(clip.track_id).is_some_and(|t| !t.locked)
            })
        });
        moving
    }

    /// Whether shifting `moving` by `diff` keeps every touched track free
    /// of stacked overlaps.
    fn simulate_move(&self, moving: &BTreeSet<ClipId>, diff: TimeMs) -> bool {
        if !self.config.reject_stacked_overlaps {
            return true;
        }
        let touched: BTreeSet<TrackId> = moving
            .iter()
            .filter_map(|&c| self.clips.get(c))
            .map(|c| c.track_id)
            .collect();
        touched.into_iter().all(|track_id| {
            let Some(track) = self.tracks.get(track_id) else {
                return true;
            };
            let mut ranges: Vec<(TimeMs, TimeMs)> = track
                .clips
                .iter()
                .filter_map(|&c| self.clips.get(c))
                .map(|c| {
                    if moving.contains(&c.id) {
                        (c.start + diff, c.end + diff)
                    } else {
                        (c.start, c.end)
                    }
                })
                .collect();
            ranges.sort();
            !exceeds_double_coverage(&ranges)
        })
    }

    fn relocate(&mut self, id: ClipId, target: DropTarget) -> Result<Option<TrackId>> {
        let clip = self.clip(id)?.clone();
        let dest = match target {
            DropTarget::Same => return Ok(None),
            DropTarget::Track(track) if track == clip.track_id => return Ok(None),
            DropTarget::Track(track) => {
                let dest = self.track(track)?;
                let fits = dest.accepts(clip.kind())
                    && !dest.locked
                    && !dest.collides_with_overlaps(clip.start, clip.end, &self.overlaps)
                    && self.fits_on_track(track, clip.start, clip.end, &HashSet::new());
                if !fits {
                    return Ok(None);
                }
                track
            }
            DropTarget::NewTrack { index } => self.new_track(clip.kind().track_kind(), Some(index)),
        };
        self.execute(Action::MoveClip {
            media_type: clip.kind(),
            clip_id: id,
            from_track: clip.track_id,
            to_track: dest,
            from_start: clip.start,
            to_start: clip.start,
        })?;
        tracing::debug!(clip = %id, from = %clip.track_id, to = %dest, "clip relocated");
        Ok(Some(dest))
    }

    /// Split a clip at `pos` (rounded to the nearest frame). Both halves end
    /// up in a fresh group. Returns the id of the new right-hand clip, or
    /// `None` when `pos` is not strictly inside the clip.
    pub fn cut_clip(&mut self, id: ClipId, pos: TimeMs) -> Result<Option<ClipId>> {
        let clip = self.clip(id)?.clone();
        if clip.dummy || self.track(clip.track_id)?.locked {
            return Ok(None);
        }
        let aligned = self.frame_rate.align(pos, AlignMode::Round);
        if aligned <= clip.start || aligned >= clip.end {
            return Ok(None);
        }

        let mut head = clip.clone();
        let new_id = self.ids.next_clip();
        let Some(tail) = head.split(aligned, new_id, self.frame_rate) else {
            return Ok(None);
        };

        self.leave_group(id)?;
        self.execute(Action::CutClip {
            media_type: clip.kind(),
            track_id: clip.track_id,
            clip_id: id,
            before: clip.span(),
            after: head.span(),
            new_clip: tail,
        })?;

        let group_id = self.ids.next_group();
        let mut group = ClipGroup::new(group_id, Color::for_group(group_id));
        group.insert(id);
        group.insert(new_id);
        self.execute(Action::AddGroup { group })?;

        if self.selection.contains(&id) {
            self.selection.insert(new_id);
        }
        self.flush();
        Ok(Some(new_id))
    }

    /// Cut every clip under `t` on unlocked tracks. Returns the new clips.
    pub fn cut_at(&mut self, t: TimeMs) -> Result<Vec<ClipId>> {
        let under: Vec<ClipId> = self
            .tracks()
            .filter(|track| !track.locked)
            .filter_map(|track| track.clip_at(t, &self.clips))
            .collect();
        let mut created = Vec::new();
        for id in under {
            created.extend(self.cut_clip(id, t)?);
        }
        Ok(created)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
