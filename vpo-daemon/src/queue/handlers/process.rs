//! Process handler: the main path. Evaluates the job's policy phase by
//! phase against one file via the phase executor, keeps the catalog
//! fresh, and captures processing statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use uuid::Uuid;
use vpo_common::config::DaemonConfig;
use vpo_common::db::{self, models::now_timestamp, Job};
use vpo_common::events::{EventBus, VpoEvent};
use vpo_common::TrackType;
use vpo_policy::types::PolicySchema;

use crate::plugin::PluginRegistry;
use crate::tools::{FfprobeIntrospector, ToolAvailability};
use crate::workflow::{PhaseExecutor, PhaseResult};

pub async fn run(
    pool: &SqlitePool,
    config: &Arc<DaemonConfig>,
    tools: &ToolAvailability,
    plugins: &Arc<PluginRegistry>,
    events: &EventBus,
    job: &Job,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let file_path = PathBuf::from(&job.file_path);
    if !file_path.exists() {
        bail!("file does not exist: {}", file_path.display());
    }

    let policy_json = job
        .policy_json
        .as_deref()
        .context("process job carries no policy")?;
    let policy: PolicySchema =
        serde_json::from_str(policy_json).context("malformed policy on job")?;
    let policy_name = job.policy_name.as_deref().unwrap_or("unnamed");

    // Refresh the catalog before evaluation: plans are computed from
    // catalog state and stale rows would plan against the wrong tracks.
    let ffprobe = tools
        .require("ffprobe")
        .context("processing requires ffprobe")?
        .to_path_buf();
    let introspector = FfprobeIntrospector::new(ffprobe);

    let before_info = introspector.probe(&file_path).await?;
    let size_before = before_info.size_bytes;
    let counts_before = TrackCounts::from_tracks(&before_info.tracks);
    let video_source_codec = before_info
        .tracks
        .iter()
        .find(|t| t.track_type == TrackType::Video)
        .and_then(|t| t.codec.clone());
    let file_id =
        db::files::upsert_file_with_tracks(pool, &before_info, Some(&job.id.to_string())).await?;

    let phases_total = policy.phases.len();
    let mut phase_results: Vec<PhaseResult> = Vec::new();
    let mut current_path = file_path.clone();

    let progress_pool = pool.clone();
    let progress_job_id = job.id;
    let on_progress = move |progress: vpo_common::db::models::JobProgress| {
        let pool = progress_pool.clone();
        let blob = serde_json::to_string(&progress).ok();
        let percent = progress.percent;
        tokio::spawn(async move {
            let _ =
                db::jobs::update_job_progress(&pool, progress_job_id, percent, blob.as_deref())
                    .await;
        });
    };

    for (phase_index, phase) in policy.phases.iter().enumerate() {
        if cancel.is_cancelled() {
            bail!("job cancelled");
        }

        let executor = PhaseExecutor::new(pool, &policy, policy_name, tools, plugins, cancel.clone())
            .with_progress(&on_progress)
            .with_temp_directory_fallback(config.temp_directory.clone());

        let result = executor
            .execute_phase(phase, &current_path)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        if let Some(new_path) = &result.output_path {
            current_path = new_path.clone();
        }

        events.emit_lossy(VpoEvent::PhaseCompleted {
            job_id: job.id,
            phase_name: result.phase_name.clone(),
            changes_made: result.changes_made.max(0) as u64,
            timestamp: chrono::Utc::now(),
        });

        info!(
            job_id = %job.id,
            phase = %result.phase_name,
            changes = result.changes_made,
            "Phase completed"
        );
        phase_results.push(result);

        let percent = ((phase_index + 1) as f64 / phases_total.max(1) as f64) * 100.0;
        let _ = db::jobs::update_job_progress(pool, job.id, percent, None).await;
    }

    // Post-run introspection keeps the catalog honest and feeds the
    // after-side of the statistics.
    let after_info = introspector.probe(&current_path).await?;
    let counts_after = TrackCounts::from_tracks(&after_info.tracks);
    db::files::upsert_file_with_tracks(pool, &after_info, Some(&job.id.to_string())).await?;

    if current_path != file_path {
        db::jobs::update_job_output(
            pool,
            job.id,
            Some(&current_path.to_string_lossy()),
            None,
        )
        .await?;
    }

    record_stats(
        pool,
        job,
        file_id,
        policy_name,
        &phase_results,
        size_before,
        after_info.size_bytes,
        counts_before,
        counts_after,
        video_source_codec,
        phases_total,
        start.elapsed().as_secs_f64(),
    )
    .await;

    Ok(())
}

/// Move handler: relocate a file and update its catalog row. The
/// destination arrives in the job's output_path.
pub async fn run_move(pool: &SqlitePool, job: &Job) -> anyhow::Result<()> {
    let source = PathBuf::from(&job.file_path);
    let destination = job
        .output_path
        .as_deref()
        .map(PathBuf::from)
        .context("move job carries no destination")?;

    if !source.exists() {
        bail!("source does not exist: {}", source.display());
    }
    if destination.exists() {
        bail!("destination already exists: {}", destination.display());
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    crate::tools::rename_or_copy(&source, &destination)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if let Some(record) =
        db::files::get_file_by_path(pool, &source.to_string_lossy()).await?
    {
        if let Some(file_id) = record.id {
            let mut conn = pool.acquire().await?;
            db::files::update_file_path(
                conn.as_mut(),
                file_id,
                &destination.to_string_lossy(),
            )
            .await?;
        }
    }

    info!(
        job_id = %job.id,
        "Moved {} -> {}",
        source.display(),
        destination.display()
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct TrackCounts {
    audio: i64,
    subtitles: i64,
    attachments: i64,
}

impl TrackCounts {
    fn from_tracks(tracks: &[vpo_common::TrackInfo]) -> Self {
        let mut counts = TrackCounts::default();
        for track in tracks {
            match track.track_type {
                TrackType::Audio => counts.audio += 1,
                TrackType::Subtitle => counts.subtitles += 1,
                TrackType::Attachment => counts.attachments += 1,
                _ => {}
            }
        }
        counts
    }
}

#[allow(clippy::too_many_arguments)]
async fn record_stats(
    pool: &SqlitePool,
    job: &Job,
    file_id: i64,
    policy_name: &str,
    phase_results: &[PhaseResult],
    size_before: i64,
    size_after: i64,
    counts_before: TrackCounts,
    counts_after: TrackCounts,
    video_source_codec: Option<String>,
    phases_total: usize,
    duration_seconds: f64,
) {
    let total_changes: i64 = phase_results.iter().map(|r| r.changes_made).sum();

    let transcode_result = phase_results
        .iter()
        .find(|r| r.video_target_codec.is_some() || r.transcode_skip_reason.is_some());
    let video_target_codec = transcode_result.and_then(|r| r.video_target_codec.clone());
    let video_skip_reason = phase_results
        .iter()
        .find_map(|r| r.transcode_skip_reason.clone());
    let encoder_type = phase_results.iter().find_map(|r| r.encoder_type.clone());
    let audio_tracks_transcoded: i64 =
        phase_results.iter().map(|r| r.audio_tracks_transcoded).sum();

    let stats = db::models::ProcessingStatsRecord {
        id: Uuid::new_v4(),
        file_id,
        processed_at: now_timestamp(),
        policy_name: policy_name.to_string(),
        size_before,
        size_after,
        size_change: size_before - size_after,
        audio_tracks_before: counts_before.audio,
        subtitle_tracks_before: counts_before.subtitles,
        attachments_before: counts_before.attachments,
        audio_tracks_after: counts_after.audio,
        subtitle_tracks_after: counts_after.subtitles,
        attachments_after: counts_after.attachments,
        audio_tracks_removed: (counts_before.audio - counts_after.audio).max(0),
        subtitle_tracks_removed: (counts_before.subtitles - counts_after.subtitles).max(0),
        attachments_removed: (counts_before.attachments - counts_after.attachments).max(0),
        duration_seconds,
        phases_completed: phase_results.len() as i64,
        phases_total: phases_total as i64,
        total_changes,
        video_source_codec,
        video_target_codec,
        video_transcode_skipped: video_skip_reason.is_some(),
        video_skip_reason,
        audio_tracks_transcoded,
        audio_tracks_preserved: (counts_after.audio - audio_tracks_transcoded).max(0),
        hash_before: None,
        hash_after: None,
        success: true,
        error_message: None,
        encoder_type,
        job_id: Some(job.id.to_string()),
    };

    let mut actions: Vec<db::models::ActionResultRecord> = Vec::new();
    let mut metrics: Vec<db::models::PerformanceMetricRecord> = Vec::new();
    for result in phase_results {
        for op in &result.operation_results {
            actions.push(db::models::ActionResultRecord {
                id: None,
                stats_id: stats.id,
                action_type: op.operation.as_str().to_string(),
                track_type: None,
                track_index: None,
                before_state: None,
                after_state: None,
                success: op.success,
                duration_ms: Some((op.duration_seconds * 1000.0) as i64),
                rule_reference: Some(result.phase_name.clone()),
                message: op.message.clone(),
            });
        }
        metrics.push(db::models::PerformanceMetricRecord {
            id: None,
            stats_id: stats.id,
            phase_name: result.phase_name.clone(),
            wall_time_seconds: result.duration_seconds,
            bytes_read: result.size_before,
            bytes_written: result.size_after,
            encoding_fps: result.encoding_fps,
            encoding_bitrate: result.encoding_bitrate_kbps.map(|kbps| kbps * 1000),
        });
    }

    if let Err(e) = db::stats::record_processing_stats(pool, &stats, &actions, &metrics).await {
        warn!(job_id = %job.id, "Could not record processing stats: {e}");
    }
}
