//! Background export over published composition snapshots.
//!
//! The loop never touches the [`Timeline`](crate::timeline::Timeline): it
//! reloads the latest [`CompositionSnapshot`](crate::sync::CompositionSnapshot)
//! from a [`SnapshotHandle`] for every frame and checks a [`CancelFlag`]
//! between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use thiserror::Error;

use crate::sync::{ActiveClip, SnapshotHandle};
use crate::time::{AlignMode, FrameRate};
use crate::types::TimeMs;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Export cancelled")]
    Cancelled,

    #[error("Nothing to export in [{start}, {end})")]
    EmptyRange { start: TimeMs, end: TimeMs },

    #[error("Frame rate is not set")]
    NoFrameRate,

    #[error("Frame sink failed: {0}")]
    Sink(String),
}

/// Consumer of composed frames, e.g. an encoder.
pub trait FrameSink {
    /// `layers` are the clips covering `time`, bottom first.
    fn encode_frame(&mut self, time: TimeMs, layers: &[ActiveClip]) -> Result<(), ExportError>;

    fn finish(&mut self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Handle for cancelling an in-progress export.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportProgress {
    pub current_frame: u64,
    pub total_frames: u64,
    /// Encoding speed in frames per second.
    pub fps: f64,
}

impl ExportProgress {
    /// Completion fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        self.current_frame as f64 / self.total_frames as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportJob {
    pub frame_rate: FrameRate,
    /// `None` exports from 0 to the end of the snapshot.
    pub range: Option<(TimeMs, TimeMs)>,
}

impl ExportJob {
    pub fn new(frame_rate: FrameRate) -> Self {
        Self {
            frame_rate,
            range: None,
        }
    }

    pub fn with_range(mut self, start: TimeMs, end: TimeMs) -> Self {
        self.range = Some((start, end));
        self
    }

    /// First frame index and frame count for a composition ending at `end`.
    pub fn frames(&self, end: TimeMs) -> (i64, u64) {
        let (start, end) = self.range.unwrap_or((TimeMs::ZERO, end));
        let rate = self.frame_rate;
        let first = rate.frame_index(rate.align(start, AlignMode::Ceil), AlignMode::Round);
        let last = rate.frame_index(rate.align(end, AlignMode::Ceil), AlignMode::Round);
        (first, (last - first).max(0) as u64)
    }
}

/// Run the export on the calling thread. Returns the number of frames
/// handed to `sink`.
pub fn run_export(
    job: &ExportJob,
    snapshots: &SnapshotHandle,
    sink: &mut dyn FrameSink,
    mut on_progress: impl FnMut(ExportProgress),
    cancel: &CancelFlag,
) -> Result<u64, ExportError> {
    if job.frame_rate.is_unset() {
        return Err(ExportError::NoFrameRate);
    }
    let end = job.range.map_or_else(|| snapshots.load().end(), |(_, end)| end);
    let (first, total_frames) = job.frames(end);
    if total_frames == 0 {
        let start = job.range.map_or(TimeMs::ZERO, |(start, _)| start);
        return Err(ExportError::EmptyRange { start, end });
    }

    tracing::info!(first, total_frames, "export started");
    let started = Instant::now();

    for n in 0..total_frames {
        if cancel.is_cancelled() {
            tracing::warn!(frame = n, total_frames, "export cancelled");
            return Err(ExportError::Cancelled);
        }
        let time = job.frame_rate.frame_to_time(first + n as i64);
        let snapshot = snapshots.load();
        sink.encode_frame(time, &snapshot.layers_at(time))?;

        if n % 10 == 0 || n == total_frames - 1 {
            let elapsed = started.elapsed().as_secs_f64();
            let fps = if elapsed > 0.0 {
                (n + 1) as f64 / elapsed
            } else {
                0.0
            };
            on_progress(ExportProgress {
                current_frame: n + 1,
                total_frames,
                fps,
            });
        }
    }

    sink.finish()?;
    tracing::info!(total_frames, "export finished");
    Ok(total_frames)
}

/// Run the export on a dedicated thread. The sink is handed back with the
/// result.
pub fn spawn_export<S>(
    job: ExportJob,
    snapshots: SnapshotHandle,
    mut sink: S,
    cancel: CancelFlag,
) -> JoinHandle<(S, Result<u64, ExportError>)>
where
    S: FrameSink + Send + 'static,
{
    std::thread::spawn(move || {
        let result = run_export(&job, &snapshots, &mut sink, |_| {}, &cancel);
        (sink, result)
    })
}
