//! The phase executor: one user-defined phase against one file, with
//! transactional semantics.
//!
//! Lifecycle per phase: capture the original mtime, create a backup, run
//! each present operation in canonical order, then either clean up the
//! backup (success) or restore from it (failure, per the policy's
//! on_error mode). Policy-constraint refusals from the evaluator count as
//! success with zero changes.

use std::path::{Path, PathBuf};
use std::time::Instant;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vpo_common::db::models::JobProgress;
use vpo_policy::types::{OnErrorMode, OperationType, PhaseDefinition, PolicySchema};

use crate::error::PhaseExecutionError;
use crate::plugin::PluginRegistry;
use crate::tools::ToolAvailability;

use super::backup::{cleanup_backup, create_backup, handle_phase_failure};
use super::ops::{self, OpContext};
use super::timestamp_ops;
use super::transcode_ops::{self, TranscodeOpDeps};
use super::types::{OperationResult, PhaseExecutionState, PhaseResult};
use super::OpError;

/// Executor for user-defined phases.
pub struct PhaseExecutor<'a> {
    pool: &'a SqlitePool,
    policy: &'a PolicySchema,
    policy_name: &'a str,
    tools: &'a ToolAvailability,
    plugins: &'a PluginRegistry,
    temp_directory: Option<PathBuf>,
    cancel: CancellationToken,
    on_progress: Option<&'a (dyn Fn(JobProgress) + Send + Sync)>,
}

impl<'a> PhaseExecutor<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        policy: &'a PolicySchema,
        policy_name: &'a str,
        tools: &'a ToolAvailability,
        plugins: &'a PluginRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let temp_directory = policy.config.temp_directory.clone();
        Self {
            pool,
            policy,
            policy_name,
            tools,
            plugins,
            temp_directory,
            cancel,
            on_progress: None,
        }
    }

    /// Receive transcode progress blobs while operations run.
    pub fn with_progress(mut self, sink: &'a (dyn Fn(JobProgress) + Send + Sync)) -> Self {
        self.on_progress = Some(sink);
        self
    }

    /// Daemon-level temp directory, used when the policy does not set
    /// its own.
    pub fn with_temp_directory_fallback(mut self, fallback: Option<PathBuf>) -> Self {
        if self.temp_directory.is_none() {
            self.temp_directory = fallback;
        }
        self
    }

    /// Execute a single phase on a file.
    pub async fn execute_phase(
        &self,
        phase: &PhaseDefinition,
        file_path: &Path,
    ) -> Result<PhaseResult, PhaseExecutionError> {
        let start = Instant::now();
        let mut state = PhaseExecutionState::new(file_path.to_path_buf(), phase.clone());

        state.size_before = std::fs::metadata(file_path).map(|m| m.len() as i64).ok();

        // The original mtime must be captured before anything touches the
        // file, or preserve mode has nothing to restore.
        if phase.file_timestamp.is_some() {
            match std::fs::metadata(file_path).and_then(|m| m.modified()) {
                Ok(mtime) => state.original_mtime = Some(mtime),
                Err(e) => {
                    let preserve = phase
                        .file_timestamp
                        .as_ref()
                        .map(|c| c.mode == vpo_policy::types::TimestampMode::Preserve)
                        .unwrap_or(false);
                    if preserve {
                        return Err(PhaseExecutionError::new(
                            &phase.name,
                            None,
                            format!("cannot capture mtime for preserve mode: {e}"),
                        ));
                    }
                    warn!("Failed to capture mtime: {e}");
                }
            }
        }

        let operations = phase.operations();
        if operations.is_empty() {
            return Ok(self.build_result(state, file_path, start, true, "Phase has no operations defined"));
        }

        info!(
            "Executing phase '{}' with {} operation(s) on {}: {}",
            phase.name,
            operations.len(),
            file_path.display(),
            operations
                .iter()
                .map(|op| op.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        state.backup_path = create_backup(file_path);
        if state.backup_path.is_none() {
            return Err(PhaseExecutionError::new(
                &phase.name,
                None,
                "cannot proceed: backup creation failed (check disk space/permissions)",
            ));
        }

        for operation in operations {
            if self.cancel.is_cancelled() {
                handle_phase_failure(&state, "cancelled");
                return Err(PhaseExecutionError::new(
                    &phase.name,
                    Some(operation.as_str()),
                    "job cancelled",
                ));
            }

            let op_result = self.execute_operation(operation, &mut state).await;
            state.operation_results.push(op_result.clone());

            if op_result.success {
                state.operations_completed.push(operation.as_str().to_string());
                state.total_changes += op_result.changes_made;
                if op_result.changes_made > 0 {
                    state.file_modified = true;
                }
                continue;
            }

            let message = op_result
                .message
                .clone()
                .unwrap_or_else(|| "operation failed".to_string());
            match self.policy.config.on_error {
                OnErrorMode::Fail => {
                    handle_phase_failure(&state, &message);
                    return Err(PhaseExecutionError::new(
                        &phase.name,
                        Some(operation.as_str()),
                        message,
                    ));
                }
                OnErrorMode::Skip => {
                    warn!(
                        "Operation {} failed in phase '{}', skipping remaining operations",
                        operation.as_str(),
                        phase.name
                    );
                    state
                        .operation_failures
                        .push((operation.as_str().to_string(), message));
                    break;
                }
                OnErrorMode::Continue => {
                    state
                        .operation_failures
                        .push((operation.as_str().to_string(), message));
                }
            }
        }

        cleanup_backup(&state);
        state.size_after = std::fs::metadata(&state.file_path)
            .map(|m| m.len() as i64)
            .ok();

        let completed = state.operations_completed.len();
        Ok(self.build_result(
            state,
            file_path,
            start,
            true,
            &format!("Completed {completed} operation(s)"),
        ))
    }

    async fn execute_operation(
        &self,
        operation: OperationType,
        state: &mut PhaseExecutionState,
    ) -> OperationResult {
        let start = Instant::now();
        debug!(
            "Executing operation {} on {}",
            operation.as_str(),
            state.file_path.display()
        );

        let outcome = self.dispatch_operation(operation, state).await;
        let duration_seconds = start.elapsed().as_secs_f64();

        match outcome {
            Ok(changes) => OperationResult {
                operation,
                success: true,
                constraint_skipped: false,
                changes_made: changes,
                message: None,
                duration_seconds,
            },
            // Constraint refusals are the policy working correctly; they
            // are informational, never failures.
            Err(OpError::Constraint(message)) => {
                info!(
                    "Operation {} skipped (constraint): {message}",
                    operation.as_str()
                );
                OperationResult {
                    operation,
                    success: true,
                    constraint_skipped: true,
                    changes_made: 0,
                    message: Some(message),
                    duration_seconds,
                }
            }
            Err(OpError::Failed(message)) => {
                warn!(
                    "Operation {} failed on {}: {message}",
                    operation.as_str(),
                    state.file_path.display()
                );
                OperationResult {
                    operation,
                    success: false,
                    constraint_skipped: false,
                    changes_made: 0,
                    message: Some(message),
                    duration_seconds,
                }
            }
        }
    }

    async fn dispatch_operation(
        &self,
        operation: OperationType,
        state: &mut PhaseExecutionState,
    ) -> Result<i64, OpError> {
        let ctx = OpContext {
            pool: self.pool,
            policy: self.policy,
            policy_name: self.policy_name,
            tools: self.tools,
            plugins: self.plugins,
            temp_directory: self.temp_directory.as_deref(),
        };

        match operation {
            // The first filter dispatched executes every filter kind in a
            // single invocation; later filter dispatches are no-ops.
            OperationType::AudioFilter
            | OperationType::SubtitleFilter
            | OperationType::AttachmentFilter => {
                if state.filters_executed {
                    return Ok(0);
                }
                let changes = ops::execute_with_plan(&ctx, state, "track filters").await?;
                state.filters_executed = true;
                Ok(changes)
            }
            OperationType::Container => {
                ops::execute_with_plan(&ctx, state, "container conversion").await
            }
            OperationType::TrackOrder => {
                ops::execute_with_plan(&ctx, state, "track ordering").await
            }
            OperationType::DefaultFlags => {
                ops::execute_with_plan(&ctx, state, "default flags").await
            }
            OperationType::Conditional => {
                ops::execute_with_plan(&ctx, state, "conditional rules").await
            }
            OperationType::AudioSynthesis => ops::execute_audio_synthesis(&ctx, state).await,
            OperationType::Transcode => {
                let deps = TranscodeOpDeps {
                    tools: self.tools,
                    policy: self.policy,
                    cancel: &self.cancel,
                    on_progress: self.on_progress,
                };
                transcode_ops::execute_transcode(&ctx, &deps, state).await
            }
            OperationType::FileTimestamp => {
                timestamp_ops::execute_file_timestamp(&ctx, state).await
            }
            OperationType::Transcription => ops::execute_transcription(&ctx, state).await,
        }
    }

    fn build_result(
        &self,
        state: PhaseExecutionState,
        original_path: &Path,
        start: Instant,
        success: bool,
        message: &str,
    ) -> PhaseResult {
        let track_order_change = match (&state.track_order_before, &state.track_order_after) {
            (Some(before), Some(after)) => Some((before.clone(), after.clone())),
            _ => None,
        };
        let output_path = (state.file_path != original_path).then(|| state.file_path.clone());

        PhaseResult {
            phase_name: state.phase.name.clone(),
            success,
            duration_seconds: start.elapsed().as_secs_f64(),
            operations_executed: state.operations_completed,
            operation_results: state.operation_results,
            changes_made: state.total_changes,
            message: message.to_string(),
            track_dispositions: state.track_dispositions,
            container_change: state.container_change,
            track_order_change,
            size_before: state.size_before,
            size_after: state.size_after,
            transcode_skip_reason: state.transcode_skip_reason,
            video_source_codec: state.video_source_codec,
            video_target_codec: state.video_target_codec,
            encoding_fps: state.encoding_fps,
            encoding_bitrate_kbps: state.encoding_bitrate_kbps,
            total_frames: state.total_frames,
            encoder_type: state.encoder_type,
            audio_tracks_transcoded: state.audio_tracks_transcoded,
            transcription_results: state.transcription_results,
            audio_synthesis_created: state.audio_synthesis_created,
            operation_failures: state.operation_failures,
            output_path,
        }
    }
}
