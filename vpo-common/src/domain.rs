//! Domain value types produced by media introspection.
//!
//! These are immutable snapshots of a file's on-disk state. The probe tool
//! produces them, the policy evaluator consumes them, and the catalog
//! persists them via `db::files` / `db::tracks`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scan outcome recorded on a catalog file row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Ok,
    Error,
    Missing,
    Pending,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Ok => "ok",
            ScanStatus::Error => "error",
            ScanStatus::Missing => "missing",
            ScanStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(ScanStatus::Ok),
            "error" => Some(ScanStatus::Error),
            "missing" => Some(ScanStatus::Missing),
            "pending" => Some(ScanStatus::Pending),
            _ => None,
        }
    }
}

/// Media stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
    Subtitle,
    Attachment,
    Other,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Video => "video",
            TrackType::Audio => "audio",
            TrackType::Subtitle => "subtitle",
            TrackType::Attachment => "attachment",
            TrackType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "video" => TrackType::Video,
            "audio" => TrackType::Audio,
            "subtitle" => TrackType::Subtitle,
            "attachment" => TrackType::Attachment,
            _ => TrackType::Other,
        }
    }
}

/// One media stream within a file.
///
/// `index` is the zero-based position within the file and is the stable
/// identity used by the catalog's `(file_id, track_index)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub index: i64,
    pub track_type: TrackType,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub is_default: bool,
    pub is_forced: bool,
    // Audio
    pub channels: Option<i64>,
    pub channel_layout: Option<String>,
    // Video
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<String>,
    /// Average frame rate from the probe. Only populated on fresh
    /// introspection; not persisted (the catalog keeps `frame_rate`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub avg_frame_rate: Option<String>,
    // HDR color metadata
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub color_space: Option<String>,
    pub color_range: Option<String>,
    pub duration_seconds: Option<f64>,
    /// Catalog row id, when the track came from the database.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
}

impl TrackInfo {
    /// Minimal constructor used by tests and synthetic tracks.
    pub fn new(index: i64, track_type: TrackType) -> Self {
        Self {
            index,
            track_type,
            codec: None,
            language: None,
            title: None,
            is_default: false,
            is_forced: false,
            channels: None,
            channel_layout: None,
            width: None,
            height: None,
            frame_rate: None,
            avg_frame_rate: None,
            color_transfer: None,
            color_primaries: None,
            color_space: None,
            color_range: None,
            duration_seconds: None,
            id: None,
        }
    }
}

/// Introspected state of a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size_bytes: i64,
    pub modified_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub container_format: Option<String>,
    pub scanned_at: DateTime<Utc>,
    pub scan_status: ScanStatus,
    pub scan_error: Option<String>,
    pub tracks: Vec<TrackInfo>,
    /// Container-level metadata tags, keys lowercased.
    pub container_tags: BTreeMap<String, String>,
    /// Plugin-provided enrichment keyed by plugin name.
    pub plugin_metadata: Option<serde_json::Value>,
}

impl FileInfo {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn directory(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    pub fn tracks_of_type(&self, kind: TrackType) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(move |t| t.track_type == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_status_round_trip() {
        for s in [
            ScanStatus::Ok,
            ScanStatus::Error,
            ScanStatus::Missing,
            ScanStatus::Pending,
        ] {
            assert_eq!(ScanStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ScanStatus::parse("bogus"), None);
    }

    #[test]
    fn track_type_parse_unknown_is_other() {
        assert_eq!(TrackType::parse("data"), TrackType::Other);
        assert_eq!(TrackType::parse("video"), TrackType::Video);
    }
}
