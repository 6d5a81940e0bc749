//! State and result types for phase execution.

use std::path::PathBuf;
use std::time::SystemTime;

use vpo_policy::plan::{ContainerChange, TrackDisposition};
use vpo_policy::types::{OperationType, PhaseDefinition};

/// Result of executing a single operation within a phase.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub operation: OperationType,
    pub success: bool,
    /// True when a policy constraint caused the operation to be skipped
    /// (not an error).
    pub constraint_skipped: bool,
    pub changes_made: i64,
    pub message: Option<String>,
    pub duration_seconds: f64,
}

/// One transcription captured during the phase.
#[derive(Debug, Clone)]
pub struct TranscriptionSummary {
    pub track_index: i64,
    pub detected_language: Option<String>,
    pub confidence: f64,
    pub track_type: String,
}

/// Mutable state threaded through one phase execution.
#[derive(Debug)]
pub(crate) struct PhaseExecutionState {
    pub file_path: PathBuf,
    pub phase: PhaseDefinition,

    pub backup_path: Option<PathBuf>,
    pub operations_completed: Vec<String>,
    pub operation_results: Vec<OperationResult>,
    /// (operation, message) pairs for skip/continue error modes.
    pub operation_failures: Vec<(String, String)>,
    pub file_modified: bool,
    /// The filter kinds are consolidated into one execution per phase.
    pub filters_executed: bool,
    pub total_changes: i64,

    /// Captured before any operation runs, for file_timestamp preserve.
    pub original_mtime: Option<SystemTime>,

    pub size_before: Option<i64>,
    pub size_after: Option<i64>,

    // Captured plan details for stats and logging
    pub track_dispositions: Vec<TrackDisposition>,
    pub container_change: Option<ContainerChange>,
    pub track_order_before: Option<Vec<i64>>,
    pub track_order_after: Option<Vec<i64>>,

    // Transcode capture
    pub transcode_skip_reason: Option<String>,
    pub video_source_codec: Option<String>,
    pub video_target_codec: Option<String>,
    pub encoding_fps: Option<f64>,
    pub encoding_bitrate_kbps: Option<i64>,
    pub total_frames: Option<i64>,
    pub encoder_type: Option<String>,
    pub audio_tracks_transcoded: i64,

    pub transcription_results: Vec<TranscriptionSummary>,
    pub audio_synthesis_created: Vec<String>,
}

impl PhaseExecutionState {
    pub fn new(file_path: PathBuf, phase: PhaseDefinition) -> Self {
        Self {
            file_path,
            phase,
            backup_path: None,
            operations_completed: Vec::new(),
            operation_results: Vec::new(),
            operation_failures: Vec::new(),
            file_modified: false,
            filters_executed: false,
            total_changes: 0,
            original_mtime: None,
            size_before: None,
            size_after: None,
            track_dispositions: Vec::new(),
            container_change: None,
            track_order_before: None,
            track_order_after: None,
            transcode_skip_reason: None,
            video_source_codec: None,
            video_target_codec: None,
            encoding_fps: None,
            encoding_bitrate_kbps: None,
            total_frames: None,
            encoder_type: None,
            audio_tracks_transcoded: 0,
            transcription_results: Vec::new(),
            audio_synthesis_created: Vec::new(),
        }
    }
}

/// What one phase did to one file.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase_name: String,
    pub success: bool,
    pub duration_seconds: f64,
    pub operations_executed: Vec<String>,
    pub operation_results: Vec<OperationResult>,
    pub changes_made: i64,
    pub message: String,

    pub track_dispositions: Vec<TrackDisposition>,
    pub container_change: Option<ContainerChange>,
    pub track_order_change: Option<(Vec<i64>, Vec<i64>)>,
    pub size_before: Option<i64>,
    pub size_after: Option<i64>,

    pub transcode_skip_reason: Option<String>,
    pub video_source_codec: Option<String>,
    pub video_target_codec: Option<String>,
    pub encoding_fps: Option<f64>,
    pub encoding_bitrate_kbps: Option<i64>,
    pub total_frames: Option<i64>,
    pub encoder_type: Option<String>,
    pub audio_tracks_transcoded: i64,

    pub transcription_results: Vec<TranscriptionSummary>,
    pub audio_synthesis_created: Vec<String>,
    pub operation_failures: Vec<(String, String)>,

    /// New primary path when the phase changed it (container change).
    pub output_path: Option<PathBuf>,
}

impl PhaseResult {
    /// True when any operation was skipped on a policy constraint.
    pub fn had_constraint_skip(&self) -> bool {
        self.operation_results.iter().any(|r| r.constraint_skipped)
    }
}
