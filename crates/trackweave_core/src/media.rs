use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::clip::{Clip, ClipContent};
use crate::error::{CoreError, Result};
use crate::time::FrameRate;
use crate::timeline::{Notification, Timeline};
use crate::types::*;

// ---------------------------------------------------------------------------
// Probe results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamInfo {
    Video {
        width: u32,
        height: u32,
        frame_rate: Option<FrameRate>,
    },
    Audio {
        channels: u32,
        sample_rate: u32,
    },
}

/// What a probe reports about one media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// `None` for stills.
    pub duration: Option<TimeMs>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    fn video(&self) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .find(|s| matches!(s, StreamInfo::Video { .. }))
    }

    fn audio(&self) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .find(|s| matches!(s, StreamInfo::Audio { .. }))
    }
}

/// Media probing collaborator, e.g. an ffprobe wrapper.
pub trait MediaProbe {
    fn open(&self, path: &Path) -> Result<MediaInfo>;
}

impl<F> MediaProbe for F
where
    F: Fn(&Path) -> Result<MediaInfo>,
{
    fn open(&self, path: &Path) -> Result<MediaInfo> {
        self(path)
    }
}

/// Parse a rational rate string like "30000/1001" or "25".
pub fn parse_frame_rate(rate: &str) -> Option<FrameRate> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<u32>().ok()?, den.trim().parse::<u32>().ok()?),
        None => (rate.trim().parse::<u32>().ok()?, 1),
    };
    if num == 0 || den == 0 {
        return None;
    }
    Some(FrameRate::new(num, den))
}

/// Decide which clip kind a probed file becomes, from its extension first
/// and its streams second.
pub fn detect_media_kind(path: &Path, info: &MediaInfo) -> Option<MediaKind> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "bmp" | "webp" | "tiff" | "svg" => Some(MediaKind::Image),
        "mp3" | "wav" | "flac" | "aac" | "ogg" | "m4a" | "wma" => {
            info.audio().map(|_| MediaKind::Audio)
        }
        _ => match (info.video(), info.audio(), info.duration) {
            (Some(_), _, Some(d)) if d > TimeMs::ZERO => Some(MediaKind::Video),
            (Some(_), _, _) => Some(MediaKind::Image),
            (None, Some(_), Some(d)) if d > TimeMs::ZERO => Some(MediaKind::Audio),
            _ => None,
        },
    }
}

fn content_for(kind: MediaKind, info: &MediaInfo, duration: TimeMs) -> ClipContent {
    match (kind, info.video(), info.audio()) {
        (MediaKind::Video, Some(StreamInfo::Video { width, height, frame_rate }), _) => {
            ClipContent::Video {
                source_duration: duration,
                frame_rate: frame_rate.unwrap_or_default(),
                width: *width,
                height: *height,
            }
        }
        (MediaKind::Audio, _, Some(StreamInfo::Audio { channels, sample_rate })) => {
            ClipContent::Audio {
                source_duration: duration,
                channels: *channels,
                sample_rate: *sample_rate,
                volume: 1.0,
            }
        }
        (MediaKind::Image, Some(StreamInfo::Video { width, height, .. }), _) => {
            ClipContent::Image {
                width: *width,
                height: *height,
            }
        }
        _ => ClipContent::placeholder(kind, duration),
    }
}

impl Timeline {
    /// Probe `path` and place it on `track` at `start`. Stills get the
    /// configured default length. The overview build is left to the caller
    /// through [`Notification::OverviewRequested`].
    pub fn add_media_clip(
        &mut self,
        probe: &dyn MediaProbe,
        path: impl AsRef<Path>,
        track: TrackId,
        start: TimeMs,
    ) -> Result<Option<ClipId>> {
        let path = path.as_ref();
        let info = probe.open(path)?;
        let kind = detect_media_kind(path, &info).ok_or_else(|| CoreError::Probe {
            path: path.to_path_buf(),
            reason: "no usable stream".into(),
        })?;

        let length = match info.duration {
            Some(d) if kind.is_trimmable() && d > TimeMs::ZERO => d,
            _ => self.config().default_still_length,
        };
        let mut clip = Clip::new(
            ClipId(0),
            track,
            content_for(kind, &info, length),
            start,
            start + length,
        );
        clip.name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        clip.path = Some(path.to_path_buf());

        let Some(id) = self.insert_clip(track, clip)? else {
            return Ok(None);
        };
        tracing::debug!(clip = %id, kind = %kind, path = %path.display(), "media clip added");
        if kind != MediaKind::Image {
            self.notify(Notification::OverviewRequested {
                clip: id,
                path: PathBuf::from(path),
            });
        }
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EditConfig;

    fn probe_video(_: &Path) -> Result<MediaInfo> {
        Ok(MediaInfo {
            duration: Some(TimeMs(12_000)),
            streams: vec![
                StreamInfo::Video {
                    width: 1920,
                    height: 1080,
                    frame_rate: parse_frame_rate("25/1"),
                },
                StreamInfo::Audio {
                    channels: 2,
                    sample_rate: 48_000,
                },
            ],
        })
    }

    fn probe_missing(path: &Path) -> Result<MediaInfo> {
        Err(CoreError::Probe {
            path: path.to_path_buf(),
            reason: "file not found".into(),
        })
    }

    #[test]
    fn parse_frame_rate_fraction() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(FrameRate::NTSC_30));
        assert_eq!(parse_frame_rate("24"), Some(FrameRate::FPS_24));
        assert_eq!(parse_frame_rate("25/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn detect_kind_by_extension_then_streams() {
        let info = probe_video(Path::new("x")).unwrap();
        assert_eq!(detect_media_kind(Path::new("a.mp4"), &info), Some(MediaKind::Video));
        assert_eq!(detect_media_kind(Path::new("a.PNG"), &info), Some(MediaKind::Image));
        assert_eq!(detect_media_kind(Path::new("a.wav"), &info), Some(MediaKind::Audio));
        assert_eq!(detect_media_kind(Path::new("a.bin"), &MediaInfo::default()), None);
    }

    #[test]
    fn add_media_clip_uses_probed_duration() {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let track = tl.new_track(TrackKind::Video, None);
        tl.take_notifications();

        let id = tl
            .add_media_clip(&probe_video, "/media/beach.mp4", track, TimeMs(1_000))
            .unwrap()
            .unwrap();
        let clip = tl.clip(id).unwrap();
        assert_eq!((clip.start, clip.end), (TimeMs(1_000), TimeMs(13_000)));
        assert_eq!(clip.name, "beach.mp4");
        assert_eq!(clip.source_duration(), Some(TimeMs(12_000)));
        assert!(tl.take_notifications().contains(&Notification::OverviewRequested {
            clip: id,
            path: PathBuf::from("/media/beach.mp4"),
        }));
    }

    #[test]
    fn stills_get_default_length() {
        let config = EditConfig {
            default_still_length: TimeMs(3_000),
            ..EditConfig::default()
        };
        let mut tl = Timeline::with_config(FrameRate::FPS_25, config);
        let track = tl.new_track(TrackKind::Video, None);
        tl.take_notifications();

        let id = tl
            .add_media_clip(&probe_video, "title.png", track, TimeMs::ZERO)
            .unwrap()
            .unwrap();
        let clip = tl.clip(id).unwrap();
        assert_eq!(clip.kind(), MediaKind::Image);
        assert_eq!(clip.length(), TimeMs(3_000));
        assert!(!tl
            .take_notifications()
            .iter()
            .any(|n| matches!(n, Notification::OverviewRequested { .. })));
    }

    #[test]
    fn probe_failure_is_propagated() {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let track = tl.new_track(TrackKind::Video, None);
        let result = tl.add_media_clip(&probe_missing, "gone.mp4", track, TimeMs::ZERO);
        assert!(matches!(result, Err(CoreError::Probe { .. })));
        assert_eq!(tl.clip_count(), 0);
    }

    #[test]
    fn audio_file_on_video_track_is_rejected() {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let track = tl.new_track(TrackKind::Video, None);
        let result = tl.add_media_clip(&probe_video, "song.mp3", track, TimeMs::ZERO);
        assert!(matches!(result, Err(CoreError::IncompatibleTrack { .. })));
    }
}
