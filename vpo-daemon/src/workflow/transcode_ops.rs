//! Transcode operation handler.
//!
//! Re-probes the file (earlier operations in the phase may already have
//! remuxed it), builds the transcode plan, runs the executor and captures
//! encoder metrics into the phase state.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vpo_common::db::models::JobProgress;
use vpo_policy::types::PolicySchema;

use crate::tools::probe::FfprobeIntrospector;
use crate::tools::progress::progress_to_job_blob;
use crate::tools::transcode::TranscodeExecutor;
use crate::tools::ToolAvailability;

use super::ops::OpContext;
use super::{OpError, PhaseExecutionState};

pub(crate) struct TranscodeOpDeps<'a> {
    pub tools: &'a ToolAvailability,
    pub policy: &'a PolicySchema,
    pub cancel: &'a CancellationToken,
    pub on_progress: Option<&'a (dyn Fn(JobProgress) + Send + Sync)>,
}

pub(crate) async fn execute_transcode(
    ctx: &OpContext<'_>,
    deps: &TranscodeOpDeps<'_>,
    state: &mut PhaseExecutionState,
) -> Result<i64, OpError> {
    let Some(transcode_config) = state.phase.transcode.clone() else {
        return Ok(0);
    };

    let ffmpeg = deps
        .tools
        .require("ffmpeg")
        .map_err(|e| OpError::Failed(e.to_string()))?
        .to_path_buf();
    let ffprobe = deps
        .tools
        .require("ffprobe")
        .map_err(|e| OpError::Failed(e.to_string()))?
        .to_path_buf();

    // Fresh introspection: earlier filter operations may have rewritten
    // the file, and only the probe knows avg_frame_rate for VFR checks.
    let introspector = FfprobeIntrospector::new(ffprobe);
    let info = introspector
        .probe(&state.file_path)
        .await
        .map_err(|e| OpError::Failed(e.to_string()))?;

    let duration = info
        .tracks
        .iter()
        .filter_map(|t| t.duration_seconds)
        .fold(None::<f64>, |acc, d| Some(acc.map_or(d, |a| a.max(d))));

    let config = &deps.policy.config;
    let executor = TranscodeExecutor::new(
        ffmpeg,
        transcode_config.clone(),
        state.phase.audio_transcode.clone(),
        config.hardware_acceleration,
        config.cpu_cores,
        config
            .temp_directory
            .clone()
            .or_else(|| ctx.temp_directory.map(|p| p.to_path_buf())),
        config.backup_original,
        config.transcode_timeout.map(Duration::from_secs),
    );

    let plan = executor.create_plan(
        &state.file_path,
        &state.file_path,
        &info.tracks,
        None,
        duration,
        Some(info.size_bytes),
        &[],
    );

    state.video_source_codec = plan.video_codec.clone();
    if plan.should_skip() {
        state.transcode_skip_reason = plan.skip_reason().map(str::to_string);
        info!(
            "Transcode skipped for {}: {}",
            state.file_path.display(),
            plan.skip_reason().unwrap_or("conditions met")
        );
        return Ok(0);
    }
    if !plan.needs_any_transcode() {
        debug!("No transcode work needed for {}", state.file_path.display());
        return Ok(0);
    }

    state.video_target_codec = transcode_config.target_video_codec.clone();

    let total_duration = plan.duration_seconds;
    let progress_sink = deps.on_progress;
    let outcome = executor
        .execute(&plan, deps.cancel, |sample| {
            if let Some(sink) = progress_sink {
                sink(progress_to_job_blob(sample, total_duration, None));
            }
        })
        .await
        .map_err(|e| OpError::Failed(e.to_string()))?;

    if !outcome.executed {
        return Ok(0);
    }

    super::ops::refresh_catalog(ctx, &state.file_path).await;

    state.encoding_fps = outcome.encoding_fps;
    state.encoding_bitrate_kbps = outcome.encoding_bitrate_kbps;
    state.total_frames = outcome.total_frames;
    state.encoder_type = outcome.encoder_type.clone();
    state.audio_tracks_transcoded = plan
        .audio_plan
        .as_ref()
        .map(|p| p.transcoded_count())
        .unwrap_or(0);

    // One video change plus whatever the audio plan touched.
    let audio_changes = plan
        .audio_plan
        .as_ref()
        .map(|p| p.transcoded_count() + p.removed_count() + p.downmix_track.is_some() as i64)
        .unwrap_or(0);
    Ok(1 + audio_changes)
}
