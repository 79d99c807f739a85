use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clip::{Clip, ClipContent};
use crate::config::EditConfig;
use crate::error::Result;
use crate::events::EventStack;
use crate::group::ClipGroup;
use crate::overlap::{Overlap, Transition};
use crate::time::FrameRate;
use crate::timeline::Timeline;
use crate::track::Track;
use crate::types::*;

const MEDIA_CLIP: &str = "MediaClip";
const MEDIA_TRACK: &str = "MediaTrack";
const MEDIA_OVERLAP: &str = "MediaOverlap";
const MEDIA_GROUP: &str = "MediaGroup";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Persisted clip. Every key is written, `null` included; a key missing
/// from a stored record is defaulted with a warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ClipRecord {
    #[serde(rename = "ID")]
    pub id: ClipId,
    #[serde(rename = "Type")]
    pub kind: MediaKind,
    #[serde(rename = "MediaID", default)]
    pub media_id: Option<MediaId>,
    #[serde(rename = "GroupID", default)]
    pub group_id: Option<GroupId>,
    pub start: TimeMs,
    pub end: TimeMs,
    pub start_offset: Option<TimeMs>,
    pub end_offset: Option<TimeMs>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub name: Option<String>,
    #[serde(default)]
    pub dummy: bool,
    pub content: Option<ClipContent>,
    #[serde(default, skip_serializing_if = "EventStack::is_empty")]
    pub events: EventStack,
}

impl From<&Clip> for ClipRecord {
    fn from(clip: &Clip) -> Self {
        Self {
            id: clip.id,
            kind: clip.kind(),
            media_id: clip.media_id,
            group_id: clip.group_id,
            start: clip.start,
            end: clip.end,
            start_offset: Some(clip.start_offset),
            end_offset: Some(clip.end_offset),
            path: clip.path.clone(),
            name: Some(clip.name.clone()),
            dummy: clip.dummy,
            content: Some(clip.content.clone()),
            events: clip.events.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrackRecord {
    #[serde(rename = "ID")]
    pub id: TrackId,
    #[serde(rename = "Type")]
    pub kind: TrackKind,
    pub name: Option<String>,
    pub expanded: Option<bool>,
    /// Visibility.
    pub view: Option<bool>,
    pub locked: Option<bool>,
    pub selected: Option<bool>,
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked: Option<TrackId>,
    pub clips: Option<Vec<ClipId>>,
    #[serde(default)]
    pub overlaps: Vec<OverlapId>,
}

impl From<&Track> for TrackRecord {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id,
            kind: track.kind,
            name: Some(track.name.clone()),
            expanded: Some(track.expanded),
            view: Some(track.visible),
            locked: Some(track.locked),
            selected: Some(track.selected),
            muted: Some(track.muted),
            linked: track.linked,
            clips: Some(track.clips.clone()),
            overlaps: track.overlaps.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct OverlapRecord {
    #[serde(rename = "ID")]
    pub id: OverlapId,
    pub start: TimeMs,
    pub end: TimeMs,
    #[serde(rename = "FrontClipID")]
    pub front: ClipId,
    #[serde(rename = "RearClipID")]
    pub rear: ClipId,
    pub transition: Option<Transition>,
}

impl From<&Overlap> for OverlapRecord {
    fn from(overlap: &Overlap) -> Self {
        Self {
            id: overlap.id,
            start: overlap.start,
            end: overlap.end,
            front: overlap.front,
            rear: overlap.rear,
            transition: Some(overlap.transition.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GroupRecord {
    #[serde(rename = "ID")]
    pub id: GroupId,
    pub color: Option<Color>,
    pub clips: Vec<ClipId>,
}

impl From<&ClipGroup> for GroupRecord {
    fn from(group: &ClipGroup) -> Self {
        Self {
            id: group.id,
            color: Some(group.color),
            clips: group.members.iter().copied().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// TimelineDocument
// ---------------------------------------------------------------------------

/// The persisted timeline. Entity records are kept as raw JSON so each one
/// can be decoded, and rejected, on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TimelineDocument {
    #[serde(default)]
    pub media_clip: Vec<Value>,
    #[serde(default)]
    pub media_track: Vec<Value>,
    #[serde(default)]
    pub media_overlap: Vec<Value>,
    #[serde(default)]
    pub media_group: Vec<Value>,
    #[serde(default)]
    pub start: TimeMs,
    #[serde(default)]
    pub end: TimeMs,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    #[serde(default)]
    pub current_time: TimeMs,
    #[serde(default)]
    pub mark_in: Option<TimeMs>,
    #[serde(default)]
    pub mark_out: Option<TimeMs>,
    #[serde(default)]
    pub id_generate_state: i64,
}

impl TimelineDocument {
    pub fn empty(frame_rate: FrameRate) -> Self {
        Self {
            media_clip: Vec::new(),
            media_track: Vec::new(),
            media_overlap: Vec::new(),
            media_group: Vec::new(),
            start: TimeMs::ZERO,
            end: TimeMs::ZERO,
            frame_rate_num: frame_rate.num,
            frame_rate_den: frame_rate.den,
            current_time: TimeMs::ZERO,
            mark_in: None,
            mark_out: None,
            id_generate_state: 1,
        }
    }

    pub fn frame_rate(&self) -> FrameRate {
        FrameRate::new(self.frame_rate_num, self.frame_rate_den)
    }
}

// ---------------------------------------------------------------------------
// Load diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A missing optional value was defaulted.
    Warning,
    /// The entity was dropped.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadIssue {
    pub severity: Severity,
    pub entity: &'static str,
    /// Position of the record in its array.
    pub index: usize,
    pub message: String,
}

impl fmt::Display for LoadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}[{}]: {}", self.entity, self.index, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub issues: Vec<LoadIssue>,
}

impl LoadReport {
    pub fn errors(&self) -> impl Iterator<Item = &LoadIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LoadIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn error(&mut self, entity: &'static str, index: usize, message: String) {
        tracing::error!(entity, index, "{message}");
        self.issues.push(LoadIssue {
            severity: Severity::Error,
            entity,
            index,
            message,
        });
    }

    fn warn(&mut self, entity: &'static str, index: usize, message: String) {
        tracing::warn!(entity, index, "{message}");
        self.issues.push(LoadIssue {
            severity: Severity::Warning,
            entity,
            index,
            message,
        });
    }

    fn decode<T: DeserializeOwned>(
        &mut self,
        entity: &'static str,
        index: usize,
        value: &Value,
    ) -> Option<T> {
        match T::deserialize(value) {
            Ok(record) => Some(record),
            Err(e) => {
                self.error(entity, index, format!("dropped: {e}"));
                None
            }
        }
    }

    /// Warn about each of `keys` absent from the raw record. Serde fills
    /// these in silently, so the check runs on the JSON object itself.
    fn expect_keys(&mut self, entity: &'static str, index: usize, value: &Value, keys: &[&str]) {
        let Some(object) = value.as_object() else {
            return;
        };
        for key in keys {
            if !object.contains_key(*key) {
                self.warn(entity, index, format!("missing {key}, using default"));
            }
        }
    }

    fn defaulted<T: Default>(
        &mut self,
        entity: &'static str,
        index: usize,
        field: &str,
        value: Option<T>,
    ) -> T {
        value.unwrap_or_else(|| {
            self.warn(entity, index, format!("missing {field}, using default"));
            T::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Timeline <-> document
// ---------------------------------------------------------------------------

impl Timeline {
    pub fn to_document(&self) -> Result<TimelineDocument> {
        let mut doc = TimelineDocument::empty(self.frame_rate());
        for track in self.tracks() {
            for clip in track.clips.iter().filter_map(|&id| self.clips.get(id)) {
                doc.media_clip.push(serde_json::to_value(ClipRecord::from(clip))?);
            }
            doc.media_track.push(serde_json::to_value(TrackRecord::from(track))?);
        }
        for overlap in self.overlaps.sorted() {
            doc.media_overlap.push(serde_json::to_value(OverlapRecord::from(overlap))?);
        }
        for group in self.groups.sorted() {
            doc.media_group.push(serde_json::to_value(GroupRecord::from(group))?);
        }
        (doc.start, doc.end) = self.range();
        doc.current_time = self.current_time();
        doc.mark_in = self.mark_in();
        doc.mark_out = self.mark_out();
        doc.id_generate_state = self.id_state();
        Ok(doc)
    }

    /// Rebuild a timeline from `doc`. Broken records are dropped and
    /// reported instead of failing the whole load. The history starts empty.
    pub fn from_document(doc: &TimelineDocument, config: EditConfig) -> (Timeline, LoadReport) {
        let mut report = LoadReport::default();
        let mut tl = Timeline::with_config(doc.frame_rate(), config);
        tl.ids = IdGenerator::with_state(doc.id_generate_state);

        // Clips wait here until a track claims them.
        let mut unplaced: HashMap<ClipId, (usize, Clip)> = HashMap::new();
        let mut declared_groups: HashMap<ClipId, GroupId> = HashMap::new();
        for (index, value) in doc.media_clip.iter().enumerate() {
            let Some(record) = report.decode::<ClipRecord>(MEDIA_CLIP, index, value) else {
                continue;
            };
            report.expect_keys(MEDIA_CLIP, index, value, &["MediaID", "GroupID", "Path"]);
            let Some(clip) = clip_from_record(&mut report, index, record.clone()) else {
                continue;
            };
            tl.ids.observe(clip.id.0);
            if let Some(group) = record.group_id {
                declared_groups.insert(clip.id, group);
            }
            if unplaced.insert(clip.id, (index, clip)).is_some() {
                report.error(MEDIA_CLIP, index, format!("duplicate clip {}", record.id));
            }
        }

        for (index, value) in doc.media_track.iter().enumerate() {
            let Some(record) = report.decode::<TrackRecord>(MEDIA_TRACK, index, value) else {
                continue;
            };
            report.expect_keys(MEDIA_TRACK, index, value, &["Overlaps"]);
            if tl.tracks.contains(record.id) {
                report.error(MEDIA_TRACK, index, format!("duplicate track {}", record.id));
                continue;
            }
            tl.ids.observe(record.id.0);
            let name = report.defaulted(MEDIA_TRACK, index, "Name", record.name);
            let mut track = Track::new(record.id, record.kind, name);
            track.expanded = report.defaulted(MEDIA_TRACK, index, "Expanded", record.expanded);
            track.visible = record.view.unwrap_or_else(|| {
                report.warn(MEDIA_TRACK, index, "missing View, using default".into());
                true
            });
            track.locked = report.defaulted(MEDIA_TRACK, index, "Locked", record.locked);
            track.selected = report.defaulted(MEDIA_TRACK, index, "Selected", record.selected);
            track.muted = report.defaulted(MEDIA_TRACK, index, "Muted", record.muted);
            track.linked = record.linked;

            for clip_id in report.defaulted(MEDIA_TRACK, index, "Clips", record.clips) {
                let Some((_, mut clip)) = unplaced.remove(&clip_id) else {
                    report.warn(MEDIA_TRACK, index, format!("unknown clip {clip_id} skipped"));
                    continue;
                };
                if !track.accepts(clip.kind()) {
                    report.error(
                        MEDIA_TRACK,
                        index,
                        format!("{} clip {clip_id} on {} track dropped", clip.kind(), track.kind),
                    );
                    continue;
                }
                clip.track_id = track.id;
                track.clips.push(clip_id);
                tl.clips.insert(clip);
            }
            tl.track_order.push(track.id);
            tl.tracks.insert(track);
        }

        let mut orphans: Vec<(usize, ClipId)> =
            unplaced.into_iter().map(|(id, (index, _))| (index, id)).collect();
        orphans.sort();
        for (index, id) in orphans {
            report.error(MEDIA_CLIP, index, format!("clip {id} is not on any track"));
        }

        let mut recorded = Vec::new();
        for (index, value) in doc.media_overlap.iter().enumerate() {
            let Some(record) = report.decode::<OverlapRecord>(MEDIA_OVERLAP, index, value) else {
                continue;
            };
            tl.ids.observe(record.id.0);
            let live = match (tl.clips.get(record.front), tl.clips.get(record.rear)) {
                (Some(a), Some(b)) if a.track_id == b.track_id => Overlap::between(record.id, a, b),
                _ => None,
            };
            let Some(mut overlap) = live else {
                report.error(
                    MEDIA_OVERLAP,
                    index,
                    format!("overlap {} no longer matches its clips", record.id),
                );
                continue;
            };
            overlap.transition = report.defaulted(MEDIA_OVERLAP, index, "Transition", record.transition);
            recorded.push(overlap);
        }

        let mut grouped: HashSet<ClipId> = HashSet::new();
        for (index, value) in doc.media_group.iter().enumerate() {
            let Some(record) = report.decode::<GroupRecord>(MEDIA_GROUP, index, value) else {
                continue;
            };
            tl.ids.observe(record.id.0);
            let color = record.color.unwrap_or_else(|| {
                report.warn(MEDIA_GROUP, index, "missing Color, using default".into());
                Color::for_group(record.id)
            });
            let mut group = ClipGroup::new(record.id, color);
            for clip_id in record.clips {
                if !tl.clips.contains(clip_id) {
                    report.warn(MEDIA_GROUP, index, format!("unknown clip {clip_id} skipped"));
                } else if !grouped.insert(clip_id) {
                    report.warn(MEDIA_GROUP, index, format!("clip {clip_id} is already grouped"));
                } else {
                    group.insert(clip_id);
                }
            }
            if group.is_empty() {
                report.warn(MEDIA_GROUP, index, format!("empty group {} dropped", record.id));
                continue;
            }
            for &member in &group.members {
                if let Some(clip) = tl.clips.get_mut(member) {
                    clip.group_id = Some(group.id);
                }
            }
            tl.groups.insert(group);
        }
        let mut mismatched: Vec<(ClipId, GroupId)> = declared_groups
            .into_iter()
            .filter(|(clip, group)| tl.clips.get(*clip).is_some_and(|c| c.group_id != Some(*group)))
            .collect();
        mismatched.sort();
        for (clip, group) in mismatched {
            report.warn(MEDIA_CLIP, 0, format!("clip {clip} claims group {group} which does not list it"));
        }

        // Overlaps come back with their recorded ids; the generator is only
        // advanced if some overlap had no record.
        let state = tl.ids.state();
        tl.update();
        tl.restore_overlaps(&recorded);
        if tl.overlaps.keys().all(|id| id.0 < state) {
            tl.ids = IdGenerator::with_state(state);
        }

        tl.set_current_time(doc.current_time);
        tl.set_marks(doc.mark_in, doc.mark_out);
        if tl.range() != (doc.start, doc.end) {
            tracing::debug!(
                stored_start = doc.start.0,
                stored_end = doc.end.0,
                "stored range differs from clips, recomputed"
            );
        }
        for problem in tl.validate() {
            report.warn("Timeline", 0, problem.to_string());
        }
        tl.take_notifications();
        tracing::info!(
            clips = tl.clip_count(),
            tracks = tl.track_ids().len(),
            errors = report.errors().count(),
            warnings = report.warnings().count(),
            "timeline loaded"
        );
        (tl, report)
    }
}

fn clip_from_record(report: &mut LoadReport, index: usize, record: ClipRecord) -> Option<Clip> {
    let start_offset = report.defaulted(MEDIA_CLIP, index, "StartOffset", record.start_offset);
    let end_offset = report.defaulted(MEDIA_CLIP, index, "EndOffset", record.end_offset);
    let name = report.defaulted(MEDIA_CLIP, index, "Name", record.name);
    let content = match record.content {
        Some(content) => content,
        None => {
            report.warn(MEDIA_CLIP, index, "missing Content, using placeholder".into());
            let source = record.end - record.start + start_offset + end_offset;
            ClipContent::placeholder(record.kind, source)
        }
    };
    if content.kind() != record.kind {
        report.error(
            MEDIA_CLIP,
            index,
            format!("clip {} is {} but carries {} content", record.id, record.kind, content.kind()),
        );
        return None;
    }
    let clip = Clip {
        id: record.id,
        track_id: TrackId(0),
        name,
        path: record.path,
        media_id: record.media_id,
        group_id: None,
        start: record.start,
        end: record.end,
        start_offset,
        end_offset,
        dummy: record.dummy,
        content,
        events: record.events,
    };
    if let Err(e) = clip.check_invariants() {
        report.error(MEDIA_CLIP, index, format!("dropped: {e}"));
        return None;
    }
    Some(clip)
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub settings: ProjectSettings,
    pub timeline: TimelineDocument,
}

impl Project {
    /// Create a new empty project with the given name and settings.
    pub fn new(name: impl Into<String>, settings: ProjectSettings) -> Self {
        let timeline = TimelineDocument::empty(settings.frame_rate);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            settings,
            timeline,
        }
    }

    /// Replace the stored document with the current state of `timeline`.
    pub fn store_timeline(&mut self, timeline: &Timeline) -> Result<()> {
        self.timeline = timeline.to_document()?;
        Ok(())
    }

    pub fn open_timeline(&self, config: EditConfig) -> (Timeline, LoadReport) {
        Timeline::from_document(&self.timeline, config)
    }

    /// Save project to a file as pretty-printed JSON.
    /// Automatically appends `.twproj` extension if not present.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = ensure_extension(path.as_ref());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        tracing::info!(path = %path.display(), "project saved");
        Ok(path)
    }

    /// Load a project from a JSON file. Entity-level problems surface when
    /// the timeline is opened, not here.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let project: Project = serde_json::from_str(&data)?;
        Ok(project)
    }
}

/// 1920x1080 25fps preset.
pub fn preset_1080p25() -> ProjectSettings {
    ProjectSettings {
        width: 1920,
        height: 1080,
        frame_rate: FrameRate::FPS_25,
        sample_rate: 48000,
    }
}

/// 1920x1080 30fps preset.
pub fn preset_1080p30() -> ProjectSettings {
    ProjectSettings {
        width: 1920,
        height: 1080,
        frame_rate: FrameRate::FPS_30,
        sample_rate: 48000,
    }
}

/// 1280x720 30fps preset.
pub fn preset_720p() -> ProjectSettings {
    ProjectSettings {
        width: 1280,
        height: 720,
        frame_rate: FrameRate::FPS_30,
        sample_rate: 48000,
    }
}

/// 3840x2160 30fps (4K) preset.
pub fn preset_4k() -> ProjectSettings {
    ProjectSettings {
        width: 3840,
        height: 2160,
        frame_rate: FrameRate::FPS_30,
        sample_rate: 48000,
    }
}

/// 1080x1920 30fps (vertical/shorts) preset.
pub fn preset_shorts() -> ProjectSettings {
    ProjectSettings {
        width: 1080,
        height: 1920,
        frame_rate: FrameRate::FPS_30,
        sample_rate: 48000,
    }
}

/// Look up a preset by its short name.
pub fn preset(name: &str) -> Option<ProjectSettings> {
    match name {
        "1080p25" => Some(preset_1080p25()),
        "1080p30" | "1080p" => Some(preset_1080p30()),
        "720p" => Some(preset_720p()),
        "4k" => Some(preset_4k()),
        "shorts" => Some(preset_shorts()),
        _ => None,
    }
}

fn ensure_extension(path: &Path) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some("twproj") {
        path.to_path_buf()
    } else {
        let mut p = path.to_path_buf();
        let mut name = p.file_name().unwrap_or_default().to_os_string();
        name.push(".twproj");
        p.set_file_name(name);
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::DropTarget;
    use serde_json::json;
    use tempfile::TempDir;

    fn populated_timeline() -> Timeline {
        let mut tl = Timeline::new(FrameRate::FPS_25);
        let v1 = tl.new_track(TrackKind::Video, None);
        let a1 = tl.new_track(TrackKind::Audio, None);
        let a = tl
            .add_clip(v1, ClipContent::video(TimeMs(8_000)), TimeMs(0), TimeMs(5_000))
            .unwrap()
            .unwrap();
        let b = tl
            .add_clip(v1, ClipContent::video(TimeMs(5_000)), TimeMs(4_000), TimeMs(9_000))
            .unwrap()
            .unwrap();
        let c = tl
            .add_clip(a1, ClipContent::audio(TimeMs(9_000)), TimeMs(0), TimeMs(9_000))
            .unwrap()
            .unwrap();
        tl.group_clips(&[b, c]).unwrap();
        let overlap = tl.overlap_between(a, b).unwrap().id;
        let transition = Transition {
            graph: crate::overlap::FilterDocument::load_from_document(json!({"node": "crossfade"})),
            ..Transition::default()
        };
        tl.set_transition(overlap, transition).unwrap();
        tl.set_track_muted(a1, true).unwrap();
        tl.set_marks(Some(TimeMs(1_000)), Some(TimeMs(8_000)));
        tl.commit("Setup");
        tl
    }

    #[test]
    fn document_uses_persisted_keys() {
        let doc = populated_timeline().to_document().unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        for key in [
            "MediaClip",
            "MediaTrack",
            "MediaOverlap",
            "MediaGroup",
            "Start",
            "End",
            "FrameRateNum",
            "FrameRateDen",
            "CurrentTime",
            "MarkIn",
            "MarkOut",
            "IdGenerateState",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let clip = &value["MediaClip"][0];
        assert_eq!(clip["ID"], json!(doc.media_clip[0]["ID"]));
        assert!(clip.get("StartOffset").is_some());
        assert_eq!(value["MediaTrack"][1]["Muted"], json!(true));
    }

    #[test]
    fn document_round_trip_keeps_identity() {
        let tl = populated_timeline();
        let doc = tl.to_document().unwrap();
        let (loaded, report) = Timeline::from_document(&doc, EditConfig::default());
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(loaded.to_document().unwrap(), doc);
        assert_eq!(loaded.id_state(), tl.id_state());
        assert!(loaded.validate().is_empty());
        assert!(!loaded.can_undo());
    }

    #[test]
    fn edits_after_load_do_not_reuse_ids() {
        let tl = populated_timeline();
        let doc = tl.to_document().unwrap();
        let (mut loaded, _) = Timeline::from_document(&doc, EditConfig::default());
        let v1 = loaded.track_ids()[0];
        let first = loaded.clips_on(v1).unwrap()[0].id;
        let tail = loaded.cut_clip(first, TimeMs(1_000)).unwrap().unwrap();
        assert!(tail.0 >= tl.id_state());
    }

    #[test]
    fn missing_required_field_drops_entity() {
        let mut doc = populated_timeline().to_document().unwrap();
        doc.media_clip[2].as_object_mut().unwrap().remove("Start");
        let dropped = doc.media_clip[2]["ID"].clone();

        let (loaded, report) = Timeline::from_document(&doc, EditConfig::default());
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].entity, MEDIA_CLIP);
        assert_eq!(errors[0].index, 2);
        let dropped: ClipId = serde_json::from_value(dropped).unwrap();
        assert!(loaded.clip(dropped).is_err());
        assert_eq!(loaded.clip_count(), 2);
    }

    #[test]
    fn missing_optional_field_is_defaulted_with_warning() {
        let mut doc = populated_timeline().to_document().unwrap();
        doc.media_track[0].as_object_mut().unwrap().remove("Name");
        doc.media_overlap[0].as_object_mut().unwrap().remove("Transition");

        let (loaded, report) = Timeline::from_document(&doc, EditConfig::default());
        assert_eq!(report.errors().count(), 0);
        assert_eq!(report.warnings().count(), 2);
        assert_eq!(loaded.tracks().next().unwrap().name, "");
        assert_eq!(loaded.overlaps().next().unwrap().transition, Transition::default());
    }

    #[test]
    fn absent_defaulted_keys_are_reported() {
        let mut doc = populated_timeline().to_document().unwrap();
        let clip = doc.media_clip[0].as_object_mut().unwrap();
        assert!(clip.contains_key("Path"));
        clip.remove("Path");
        clip.remove("GroupID");
        doc.media_track[0].as_object_mut().unwrap().remove("Overlaps");

        let (loaded, report) = Timeline::from_document(&doc, EditConfig::default());
        assert_eq!(report.errors().count(), 0);
        let warnings: Vec<String> = report.warnings().map(|w| w.to_string()).collect();
        assert_eq!(warnings.len(), 3, "{warnings:?}");
        assert!(warnings[0].contains("MediaClip[0]: missing GroupID"));
        assert!(warnings[1].contains("MediaClip[0]: missing Path"));
        assert!(warnings[2].contains("MediaTrack[0]: missing Overlaps"));
        assert_eq!(loaded.overlaps().count(), 1);
        assert!(loaded.validate().is_empty());
    }

    #[test]
    fn clip_without_track_is_reported() {
        let mut doc = populated_timeline().to_document().unwrap();
        doc.media_track.pop();
        let (loaded, report) = Timeline::from_document(&doc, EditConfig::default());
        assert_eq!(loaded.track_ids().len(), 1);
        assert!(report
            .errors()
            .any(|i| i.entity == MEDIA_CLIP && i.message.contains("not on any track")));
    }

    #[test]
    fn stale_overlap_record_is_dropped() {
        let mut tl = populated_timeline();
        let v1 = tl.track_ids()[0];
        let b = tl.clips_on(v1).unwrap()[1].id;
        let mut doc = tl.to_document().unwrap();
        tl.move_clip(b, TimeMs(2_000), true, DropTarget::Same).unwrap();
        let moved = tl.to_document().unwrap();
        doc.media_clip = moved.media_clip;

        let (loaded, report) = Timeline::from_document(&doc, EditConfig::default());
        assert_eq!(loaded.overlaps().count(), 0);
        assert!(report.errors().any(|i| i.entity == MEDIA_OVERLAP));
    }

    #[test]
    fn create_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test_project.twproj");

        let mut project = Project::new("Test Project", preset_1080p25());
        project.store_timeline(&populated_timeline()).unwrap();
        project.save_to_file(&path).unwrap();

        let loaded = Project::load_from_file(&path).unwrap();
        assert_eq!(project, loaded);
        let (tl, report) = loaded.open_timeline(EditConfig::default());
        assert!(report.is_clean());
        assert_eq!(tl.clip_count(), 3);
        assert_eq!(tl.mark_in(), Some(TimeMs(1_000)));
    }

    #[test]
    fn load_nonexistent_file_returns_error() {
        let result = Project::load_from_file("/tmp/does_not_exist_trackweave_test.twproj");
        assert!(result.is_err());
    }

    #[test]
    fn extension_appended_if_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no_ext");

        let project = Project::new("ExtTest", preset_720p());
        let written = project.save_to_file(&path).unwrap();

        let expected_path = dir.path().join("no_ext.twproj");
        assert_eq!(written, expected_path);
        assert!(expected_path.exists());

        let loaded = Project::load_from_file(&expected_path).unwrap();
        assert_eq!(project, loaded);
    }

    #[test]
    fn preset_values_are_correct() {
        let p = preset_1080p25();
        assert_eq!((p.width, p.height), (1920, 1080));
        assert_eq!(p.frame_rate, FrameRate::FPS_25);

        let shorts = preset_shorts();
        assert_eq!((shorts.width, shorts.height), (1080, 1920));

        let p4k = preset("4k").unwrap();
        assert_eq!((p4k.width, p4k.height), (3840, 2160));
        assert_eq!(p4k.sample_rate, 48000);

        assert_eq!(preset("1080p"), Some(preset_1080p30()));
        assert_eq!(preset("8k"), None);
    }
}
