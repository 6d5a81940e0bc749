//! Database record types and status enums.
//!
//! Records mirror table rows one-to-one. Timestamps are RFC 3339 UTC
//! strings throughout; they compare correctly both in SQL and in Rust.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{FileInfo, ScanStatus, TrackInfo, TrackType};
use crate::error::{Error, Result};

/// Current UTC time as the canonical stored timestamp string.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

// ============================================================================
// Status enums
// ============================================================================

/// Type of job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Transcode,
    Move,
    Scan,
    Apply,
    Process,
    Prune,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Transcode => "transcode",
            JobType::Move => "move",
            JobType::Scan => "scan",
            JobType::Apply => "apply",
            JobType::Process => "process",
            JobType::Prune => "prune",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "transcode" => Ok(JobType::Transcode),
            "move" => Ok(JobType::Move),
            "scan" => Ok(JobType::Scan),
            "apply" => Ok(JobType::Apply),
            "process" => Ok(JobType::Process),
            "prune" => Ok(JobType::Prune),
            other => Err(Error::InvalidInput(format!("unknown job type: {other}"))),
        }
    }
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Status of a plan in the approval workflow.
///
/// Transitions:
///   pending → approved | rejected | canceled
///   approved → applied | canceled
///
/// Terminal states: rejected, applied, canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
    Canceled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Approved => "approved",
            PlanStatus::Rejected => "rejected",
            PlanStatus::Applied => "applied",
            PlanStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PlanStatus::Pending),
            "approved" => Ok(PlanStatus::Approved),
            "rejected" => Ok(PlanStatus::Rejected),
            "applied" => Ok(PlanStatus::Applied),
            "canceled" => Ok(PlanStatus::Canceled),
            other => Err(Error::InvalidInput(format!("unknown plan status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Rejected | PlanStatus::Applied | PlanStatus::Canceled
        )
    }
}

/// Status of a policy application in the operations audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OperationStatus::Pending),
            "IN_PROGRESS" => Ok(OperationStatus::InProgress),
            "COMPLETED" => Ok(OperationStatus::Completed),
            "FAILED" => Ok(OperationStatus::Failed),
            "ROLLED_BACK" => Ok(OperationStatus::RolledBack),
            other => Err(Error::InvalidInput(format!(
                "unknown operation status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::RolledBack
        )
    }
}

// ============================================================================
// Records
// ============================================================================

/// Database record for the files table.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Option<i64>,
    pub path: String,
    pub filename: String,
    pub directory: String,
    pub extension: String,
    pub size_bytes: i64,
    pub modified_at: String,
    pub content_hash: Option<String>,
    pub container_format: Option<String>,
    pub scanned_at: String,
    pub scan_status: ScanStatus,
    pub scan_error: Option<String>,
    /// UUID of the scan job that discovered or last updated this file.
    pub job_id: Option<String>,
    /// JSON object keyed by plugin name.
    pub plugin_metadata: Option<String>,
    /// JSON object of container-level tags, keys lowercase.
    pub container_tags: Option<String>,
}

impl FileRecord {
    /// Build a record from an introspection result.
    pub fn from_file_info(info: &FileInfo, job_id: Option<&str>) -> Self {
        let plugin_metadata = info
            .plugin_metadata
            .as_ref()
            .map(|v| v.to_string());
        let container_tags = if info.container_tags.is_empty() {
            None
        } else {
            serde_json::to_string(&info.container_tags).ok()
        };

        Self {
            id: None,
            path: info.path.to_string_lossy().into_owned(),
            filename: info.filename(),
            directory: info.directory().to_string_lossy().into_owned(),
            extension: info.extension(),
            size_bytes: info.size_bytes,
            modified_at: info.modified_at.to_rfc3339(),
            content_hash: info.content_hash.clone(),
            container_format: info.container_format.clone(),
            scanned_at: info.scanned_at.to_rfc3339(),
            scan_status: info.scan_status,
            scan_error: info.scan_error.clone(),
            job_id: job_id.map(str::to_string),
            plugin_metadata,
            container_tags,
        }
    }
}

/// Database record for the tracks table.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub id: Option<i64>,
    pub file_id: i64,
    pub track_index: i64,
    pub track_type: TrackType,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub is_default: bool,
    pub is_forced: bool,
    pub channels: Option<i64>,
    pub channel_layout: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub color_space: Option<String>,
    pub color_range: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl TrackRecord {
    pub fn from_track_info(info: &TrackInfo, file_id: i64) -> Self {
        Self {
            id: None,
            file_id,
            track_index: info.index,
            track_type: info.track_type,
            codec: info.codec.clone(),
            language: info.language.clone(),
            title: info.title.clone(),
            is_default: info.is_default,
            is_forced: info.is_forced,
            channels: info.channels,
            channel_layout: info.channel_layout.clone(),
            width: info.width,
            height: info.height,
            frame_rate: info.frame_rate.clone(),
            color_transfer: info.color_transfer.clone(),
            color_primaries: info.color_primaries.clone(),
            color_space: info.color_space.clone(),
            color_range: info.color_range.clone(),
            duration_seconds: info.duration_seconds,
        }
    }

    /// Inverse of `from_track_info`, for feeding the evaluator from the
    /// catalog.
    pub fn to_track_info(&self) -> TrackInfo {
        TrackInfo {
            index: self.track_index,
            track_type: self.track_type,
            codec: self.codec.clone(),
            language: self.language.clone(),
            title: self.title.clone(),
            is_default: self.is_default,
            is_forced: self.is_forced,
            channels: self.channels,
            channel_layout: self.channel_layout.clone(),
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate.clone(),
            avg_frame_rate: None,
            color_transfer: self.color_transfer.clone(),
            color_primaries: self.color_primaries.clone(),
            color_space: self.color_space.clone(),
            color_range: self.color_range.clone(),
            duration_seconds: self.duration_seconds,
            id: self.id,
        }
    }
}

/// Convert catalog track records to domain tracks.
pub fn tracks_to_track_info(records: &[TrackRecord]) -> Vec<TrackInfo> {
    records.iter().map(TrackRecord::to_track_info).collect()
}

/// Detailed progress for a running job (the `progress_json` blob).
///
/// Consumers treat every field except `percent` as optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_current_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_total_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size_current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub eta_s: Option<i64>,
}

/// Database record for the jobs table.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub file_id: Option<i64>,
    pub file_path: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Lower value claims earlier. Valid range 0..=1000.
    pub priority: i64,
    pub policy_name: Option<String>,
    pub policy_json: Option<String>,
    pub progress_percent: f64,
    pub progress_json: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub worker_pid: Option<i64>,
    pub worker_heartbeat: Option<String>,
    pub output_path: Option<String>,
    pub backup_path: Option<String>,
    pub error_message: Option<String>,
    pub files_affected_json: Option<String>,
    pub summary_json: Option<String>,
    pub log_path: Option<String>,
    /// 'cli' or 'daemon'.
    pub origin: Option<String>,
    /// UUID grouping multi-file CLI operations.
    pub batch_id: Option<String>,
}

/// Default priority for new jobs.
pub const DEFAULT_JOB_PRIORITY: i64 = 100;

impl Job {
    /// New queued job with defaults for everything optional.
    pub fn new(job_type: JobType, file_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id: None,
            file_path: file_path.into(),
            job_type,
            status: JobStatus::Queued,
            priority: DEFAULT_JOB_PRIORITY,
            policy_name: None,
            policy_json: None,
            progress_percent: 0.0,
            progress_json: None,
            created_at: now_timestamp(),
            started_at: None,
            completed_at: None,
            worker_pid: None,
            worker_heartbeat: None,
            output_path: None,
            backup_path: None,
            error_message: None,
            files_affected_json: None,
            summary_json: None,
            log_path: None,
            origin: None,
            batch_id: None,
        }
    }
}

/// Database record for the plans table.
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub id: Uuid,
    /// Nullable: the file may have been deleted after planning.
    pub file_id: Option<i64>,
    pub file_path: String,
    pub policy_name: String,
    pub policy_version: i64,
    pub job_id: Option<String>,
    pub actions_json: String,
    pub action_count: i64,
    pub requires_remux: bool,
    pub status: PlanStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Database record for the operations audit table.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub id: Uuid,
    pub file_id: i64,
    pub file_path: String,
    pub policy_name: String,
    pub policy_version: i64,
    pub actions_json: String,
    pub status: OperationStatus,
    pub error_message: Option<String>,
    pub backup_path: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Database record for plugin_acknowledgments.
#[derive(Debug, Clone)]
pub struct PluginAcknowledgment {
    pub id: Option<i64>,
    pub plugin_name: String,
    pub plugin_hash: String,
    pub acknowledged_at: String,
    pub acknowledged_by: Option<String>,
}

/// Database record for transcription_results.
#[derive(Debug, Clone)]
pub struct TranscriptionResultRecord {
    pub id: Option<i64>,
    pub track_id: i64,
    pub detected_language: Option<String>,
    pub confidence_score: f64,
    /// 'main', 'commentary', 'alternate', 'music', 'sfx' or 'non_speech'.
    pub track_type: String,
    pub transcript_sample: Option<String>,
    pub plugin_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Database record for language_analysis_results.
#[derive(Debug, Clone)]
pub struct LanguageAnalysisResultRecord {
    pub id: Option<i64>,
    pub track_id: i64,
    pub file_hash: String,
    pub primary_language: String,
    /// Fraction of the track in the primary language, 0.0..=1.0.
    pub primary_percentage: f64,
    /// 'SINGLE_LANGUAGE' or 'MULTI_LANGUAGE'.
    pub classification: String,
    pub analysis_metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Database record for language_segments.
#[derive(Debug, Clone)]
pub struct LanguageSegmentRecord {
    pub id: Option<i64>,
    pub analysis_id: i64,
    pub language_code: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: f64,
}

/// Database record for track_classification_results.
#[derive(Debug, Clone)]
pub struct TrackClassificationRecord {
    pub id: Option<i64>,
    pub track_id: i64,
    pub file_hash: String,
    /// 'original', 'dubbed' or 'unknown'.
    pub original_dubbed_status: String,
    /// 'commentary', 'main' or 'unknown'.
    pub commentary_status: String,
    pub confidence: f64,
    /// 'metadata', 'acoustic', 'combined' or 'position'.
    pub detection_method: String,
    pub acoustic_profile_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Database record for processing_stats.
#[derive(Debug, Clone)]
pub struct ProcessingStatsRecord {
    pub id: Uuid,
    pub file_id: i64,
    pub processed_at: String,
    pub policy_name: String,

    pub size_before: i64,
    pub size_after: i64,
    /// `size_before - size_after`; positive means bytes saved.
    pub size_change: i64,

    pub audio_tracks_before: i64,
    pub subtitle_tracks_before: i64,
    pub attachments_before: i64,
    pub audio_tracks_after: i64,
    pub subtitle_tracks_after: i64,
    pub attachments_after: i64,
    pub audio_tracks_removed: i64,
    pub subtitle_tracks_removed: i64,
    pub attachments_removed: i64,

    pub duration_seconds: f64,
    pub phases_completed: i64,
    pub phases_total: i64,
    pub total_changes: i64,

    pub video_source_codec: Option<String>,
    pub video_target_codec: Option<String>,
    pub video_transcode_skipped: bool,
    pub video_skip_reason: Option<String>,
    pub audio_tracks_transcoded: i64,
    pub audio_tracks_preserved: i64,

    pub hash_before: Option<String>,
    pub hash_after: Option<String>,

    pub success: bool,
    pub error_message: Option<String>,

    /// 'hardware', 'software' or None if unknown.
    pub encoder_type: Option<String>,
    pub job_id: Option<String>,
}

/// Per-action detail within a processing run.
#[derive(Debug, Clone)]
pub struct ActionResultRecord {
    pub id: Option<i64>,
    pub stats_id: Uuid,
    pub action_type: String,
    pub track_type: Option<String>,
    pub track_index: Option<i64>,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub success: bool,
    pub duration_ms: Option<i64>,
    pub rule_reference: Option<String>,
    pub message: Option<String>,
}

/// Per-phase performance detail within a processing run.
#[derive(Debug, Clone)]
pub struct PerformanceMetricRecord {
    pub id: Option<i64>,
    pub stats_id: Uuid,
    pub phase_name: String,
    pub wall_time_seconds: f64,
    pub bytes_read: Option<i64>,
    pub bytes_written: Option<i64>,
    pub encoding_fps: Option<f64>,
    pub encoding_bitrate: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn status_string_round_trips() {
        for s in ["queued", "running", "completed", "failed", "cancelled"] {
            assert_eq!(JobStatus::parse(s).unwrap().as_str(), s);
        }
        for t in ["transcode", "move", "scan", "apply", "process", "prune"] {
            assert_eq!(JobType::parse(t).unwrap().as_str(), t);
        }
        for p in ["pending", "approved", "rejected", "applied", "canceled"] {
            assert_eq!(PlanStatus::parse(p).unwrap().as_str(), p);
        }
        assert!(JobStatus::parse("paused").is_err());
    }

    #[test]
    fn track_record_round_trip() {
        let mut info = TrackInfo::new(2, TrackType::Audio);
        info.codec = Some("aac".to_string());
        info.language = Some("eng".to_string());
        info.channels = Some(6);
        info.is_default = true;

        let record = TrackRecord::from_track_info(&info, 7);
        assert_eq!(record.file_id, 7);
        assert_eq!(record.track_index, 2);

        let back = record.to_track_info();
        assert_eq!(back.codec.as_deref(), Some("aac"));
        assert_eq!(back.channels, Some(6));
        assert!(back.is_default);
    }

    #[test]
    fn job_progress_serializes_sparsely() {
        let progress = JobProgress {
            percent: 50.0,
            fps: Some(24.0),
            ..Default::default()
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"percent\":50.0"));
        assert!(json.contains("fps"));
        assert!(!json.contains("frame_total"));
    }
}
