use std::collections::HashSet;

use crate::timeline::Timeline;
use crate::types::*;

/// Nearest snap point within the threshold, if any.
pub fn nearest_snap_point(
    position: TimeMs,
    snap_points: &[TimeMs],
    threshold: TimeMs,
) -> Option<TimeMs> {
    let mut best: Option<(i64, TimeMs)> = None;
    for &point in snap_points {
        let dist = (position.0 - point.0).abs();
        if dist <= threshold.0 && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, point));
        }
    }
    best.map(|(_, point)| point)
}

/// Find the nearest snap point within the threshold.
/// Returns the snapped position if within threshold, otherwise the original position.
pub fn find_snap_point(position: TimeMs, snap_points: &[TimeMs], threshold: TimeMs) -> TimeMs {
    nearest_snap_point(position, snap_points, threshold).unwrap_or(position)
}

/// Collect snap points from a timeline: the origin, mark in/out and the
/// edges of every clip not in `moving`.
pub fn collect_snap_points(timeline: &Timeline, moving: &HashSet<ClipId>) -> Vec<TimeMs> {
    let mut points = vec![TimeMs::ZERO];

    for clip in timeline.clips() {
        if moving.contains(&clip.id) {
            continue;
        }
        points.push(clip.start);
        points.push(clip.end);
    }

    points.extend(timeline.mark_in());
    points.extend(timeline.mark_out());

    points.sort();
    points.dedup();
    points
}

/// Smallest correction that lands one moving edge exactly on a snap point,
/// considering only points the drag is heading toward. Returns the full
/// delta to apply and the point snapped to.
pub fn find_snap_delta(
    moving_edges: &[TimeMs],
    snap_points: &[TimeMs],
    diff: TimeMs,
    threshold: TimeMs,
) -> Option<(TimeMs, TimeMs)> {
    let mut best: Option<(TimeMs, TimeMs, TimeMs)> = None;
    for &edge in moving_edges {
        let moved = edge + diff;
        let Some(point) = nearest_snap_point(moved, snap_points, threshold) else {
            continue;
        };
        let delta = point - edge;
        if delta.signum() != diff.signum() {
            continue;
        }
        let dist = (point - moved).abs();
        if best.is_none_or(|(d, _, _)| dist < d) {
            best = Some((dist, delta, point));
        }
    }
    best.map(|(_, delta, point)| (delta, point))
}

/// Magnetic snapping state for one drag gesture.
///
/// Once an edge snaps, motion that carries it on through the snap point is
/// held back until it accumulates past `release_ratio * threshold`; then
/// the accumulated motion is released in one step. Backing off toward the
/// side the drag came from is never held.
#[derive(Debug, Clone, Default)]
pub struct Snapper {
    held: Option<TimeMs>,
    /// Sign of the drag that reached the held point.
    approach: i64,
    pending: TimeMs,
}

impl Snapper {
    pub fn is_snapped(&self) -> bool {
        self.held.is_some()
    }

    pub fn snapped_to(&self) -> Option<TimeMs> {
        self.held
    }

    pub fn reset(&mut self) {
        self.held = None;
        self.approach = 0;
        self.pending = TimeMs::ZERO;
    }

    pub fn adjust(
        &mut self,
        diff: TimeMs,
        moving_edges: &[TimeMs],
        snap_points: &[TimeMs],
        threshold: TimeMs,
        release_ratio: f64,
    ) -> TimeMs {
        if threshold.0 <= 0 || diff.is_zero() {
            return diff;
        }
        if self.held.is_some() {
            let pending = self.pending + diff;
            let release = TimeMs((threshold.0 as f64 * release_ratio).round() as i64);
            if pending.0.signum() == self.approach && pending.abs() <= release {
                self.pending = pending;
                return TimeMs::ZERO;
            }
            self.reset();
            return pending;
        }
        match find_snap_delta(moving_edges, snap_points, diff, threshold) {
            Some((delta, point)) => {
                self.held = Some(point);
                self.approach = delta.0.signum();
                delta
            }
            None => diff,
        }
    }
}
