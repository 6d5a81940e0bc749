//! Plan-based and advanced operation handlers.
//!
//! Plan-based operations (container, filters, track order, default
//! flags, conditional) share one flow: evaluate the phase against the
//! catalog state, select an executor, run it, record the audit trail.
//! Audio synthesis and transcription have their own handlers.

use std::collections::HashMap;
use std::path::Path;

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use vpo_common::db::{self, models::now_timestamp};
use vpo_common::{TrackInfo, TrackType};
use vpo_policy::evaluator::{
    evaluate_policy, EvaluationInput, EvaluationPolicy, LanguageVerdict,
};
use vpo_policy::plan::{ActionType, Plan};
use vpo_policy::types::{AudioLayout, PolicySchema};

use crate::plugin::PluginRegistry;
use crate::tools::{
    replace_with_temp, runner::run_tool, select_executor, temp_output_path, ToolAvailability,
};

use super::types::TranscriptionSummary;
use super::{OpError, PhaseExecutionState};

/// Everything an operation handler needs from its surroundings.
pub(crate) struct OpContext<'a> {
    pub pool: &'a SqlitePool,
    pub policy: &'a PolicySchema,
    pub policy_name: &'a str,
    pub tools: &'a ToolAvailability,
    pub plugins: &'a PluginRegistry,
    pub temp_directory: Option<&'a Path>,
}

/// Catalog context for the file being processed.
pub(crate) struct FileContext {
    pub file_id: i64,
    pub tracks: Vec<TrackInfo>,
    pub container: String,
    pub plugin_metadata: Option<serde_json::Value>,
}

pub(crate) async fn load_file_context(
    pool: &SqlitePool,
    file_path: &Path,
) -> Result<FileContext, OpError> {
    let record = db::files::get_file_by_path(pool, &file_path.to_string_lossy())
        .await?
        .ok_or_else(|| OpError::Failed(format!("file not in catalog: {}", file_path.display())))?;
    let file_id = record
        .id
        .ok_or_else(|| OpError::Failed("catalog row without id".to_string()))?;

    let tracks = db::files::get_tracks_as_info(pool, file_id).await?;

    let container = record
        .container_format
        .clone()
        .unwrap_or_else(|| {
            file_path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    let plugin_metadata = record
        .plugin_metadata
        .as_deref()
        .and_then(|raw| match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "Corrupted plugin_metadata JSON for {} (file_id={file_id}): {e}. \
                     Metadata conditions will not be evaluated.",
                    file_path.display()
                );
                None
            }
        });

    Ok(FileContext {
        file_id,
        tracks,
        container,
        plugin_metadata,
    })
}

/// Language-analysis verdicts for the given tracks, keyed by track index.
async fn language_verdicts(
    pool: &SqlitePool,
    tracks: &[TrackInfo],
) -> Result<HashMap<i64, LanguageVerdict>, OpError> {
    let track_ids: Vec<i64> = tracks.iter().filter_map(|t| t.id).collect();
    let analyses = db::analysis::get_language_analyses_for_tracks(pool, &track_ids).await?;

    let mut verdicts = HashMap::new();
    for track in tracks {
        if let Some(id) = track.id {
            if let Some(analysis) = analyses.get(&id) {
                verdicts.insert(
                    track.index,
                    LanguageVerdict {
                        primary_language: analysis.primary_language.clone(),
                        primary_percentage: analysis.primary_percentage,
                    },
                );
            }
        }
    }
    Ok(verdicts)
}

fn capture_plan_details(state: &mut PhaseExecutionState, plan: &Plan) {
    if !plan.track_dispositions.is_empty() {
        state
            .track_dispositions
            .extend(plan.track_dispositions.iter().cloned());
    }
    if plan.container_change.is_some() {
        state.container_change = plan.container_change.clone();
    }
    for action in &plan.actions {
        if action.action_type == ActionType::Reorder {
            state.track_order_before = serde_json::from_value(action.current_value.clone()).ok();
            state.track_order_after = serde_json::from_value(action.desired_value.clone()).ok();
        }
    }
}

/// The shared flow for plan-based operations. Returns the number of
/// changes applied.
pub(crate) async fn execute_with_plan(
    ctx: &OpContext<'_>,
    state: &mut PhaseExecutionState,
    operation_name: &str,
) -> Result<i64, OpError> {
    let file = load_file_context(ctx.pool, &state.file_path).await?;

    let verdicts = language_verdicts(ctx.pool, &file.tracks).await?;

    let eval_policy =
        EvaluationPolicy::from_phase(&state.phase, &ctx.policy.config, ctx.policy.version);
    let file_id_string = file.file_id.to_string();
    let input = EvaluationInput {
        file_id: &file_id_string,
        file_path: &state.file_path,
        container: &file.container,
        tracks: &file.tracks,
        plugin_metadata: file.plugin_metadata.as_ref(),
        language_results: Some(&verdicts),
    };

    // PolicyError converts into a constraint skip via OpError.
    let plan = evaluate_policy(&input, &eval_policy)?;

    capture_plan_details(state, &plan);

    let changes = plan.change_count();
    if changes == 0 {
        debug!("No changes needed for {operation_name}");
        return Ok(0);
    }

    let executor = select_executor(&plan, &file.container, ctx.tools, ctx.temp_directory)
        .ok_or_else(|| {
            OpError::Failed(format!(
                "no tool available for {operation_name} (container={})",
                file.container
            ))
        })?;

    info!(
        "Executing {operation_name} with {} ({} actions, {} tracks removed)",
        executor.name(),
        plan.actions.len(),
        plan.tracks_removed
    );

    // Audit trail around the mutation.
    let actions_json = serde_json::to_string(&plan.actions)
        .map_err(|e| OpError::Failed(format!("cannot serialize actions: {e}")))?;
    let operation = db::operations::create_operation(
        ctx.pool,
        file.file_id,
        &state.file_path.to_string_lossy(),
        ctx.policy_name,
        ctx.policy.version,
        &actions_json,
    )
    .await?;
    db::operations::update_operation_status(
        ctx.pool,
        operation.id,
        db::OperationStatus::InProgress,
        None,
        None,
    )
    .await?;

    // The phase owns the backup lifecycle.
    let result = executor.execute(&plan, false).await;

    match result {
        Ok(outcome) => {
            db::operations::update_operation_status(
                ctx.pool,
                operation.id,
                db::OperationStatus::Completed,
                None,
                state.backup_path.as_deref().map(Path::to_str).flatten(),
            )
            .await?;

            if let Some(new_path) = outcome.output_path {
                handle_path_change(ctx.pool, state, &new_path, file.file_id).await?;
            }

            // Refresh the catalog immediately: later operations in this
            // phase evaluate against catalog state, and the file just
            // changed under it.
            refresh_catalog(ctx, &state.file_path).await;

            Ok(changes)
        }
        Err(e) => {
            let message = e.to_string();
            db::operations::update_operation_status(
                ctx.pool,
                operation.id,
                db::OperationStatus::Failed,
                Some(&message),
                state.backup_path.as_deref().map(Path::to_str).flatten(),
            )
            .await?;
            Err(OpError::Failed(message))
        }
    }
}

/// Best-effort re-introspection after a mutation.
pub(crate) async fn refresh_catalog(ctx: &OpContext<'_>, file_path: &Path) {
    let Ok(ffprobe) = ctx.tools.require("ffprobe") else {
        return;
    };
    let introspector = crate::tools::probe::FfprobeIntrospector::new(ffprobe.to_path_buf());
    match introspector.probe(file_path).await {
        Ok(info) => {
            if let Err(e) = db::files::upsert_file_with_tracks(ctx.pool, &info, None).await {
                warn!("Catalog refresh failed for {}: {e}", file_path.display());
            }
        }
        Err(e) => warn!("Re-probe failed for {}: {e}", file_path.display()),
    }
}

/// Update the catalog and the in-memory state after a container change.
/// The database moves first; the state only flips once the row is safe.
async fn handle_path_change(
    pool: &SqlitePool,
    state: &mut PhaseExecutionState,
    new_path: &Path,
    file_id: i64,
) -> Result<(), OpError> {
    let mut conn = pool.acquire().await.map_err(vpo_common::Error::from)?;
    let updated =
        db::files::update_file_path(conn.as_mut(), file_id, &new_path.to_string_lossy()).await?;
    if !updated {
        return Err(OpError::Failed(format!(
            "catalog path update affected no row (file_id={file_id})"
        )));
    }

    info!(
        "Updated file path: {} -> {}",
        state.file_path.display(),
        new_path.display()
    );
    state.file_path = new_path.to_path_buf();
    Ok(())
}

/// Synthesize an additional audio track in the target layout.
pub(crate) async fn execute_audio_synthesis(
    ctx: &OpContext<'_>,
    state: &mut PhaseExecutionState,
) -> Result<i64, OpError> {
    let Some(config) = state.phase.audio_synthesis.clone() else {
        return Ok(0);
    };

    let file = load_file_context(ctx.pool, &state.file_path).await?;
    let audio: Vec<&TrackInfo> = file
        .tracks
        .iter()
        .filter(|t| t.track_type == TrackType::Audio)
        .collect();

    let target_channels = config.target_layout.channels();
    if config.only_if_missing && audio.iter().any(|t| t.channels == Some(target_channels)) {
        debug!(
            "Audio synthesis skipped: {} layout already present",
            config.target_layout.as_str()
        );
        return Ok(0);
    }

    // Source: the first audio stream with more channels than the target.
    let Some((source_position, source)) = audio
        .iter()
        .enumerate()
        .find(|(_, t)| t.channels.map(|c| c > target_channels).unwrap_or(false))
    else {
        debug!("Audio synthesis skipped: no suitable source track");
        return Ok(0);
    };

    let ffmpeg = ctx
        .tools
        .require("ffmpeg")
        .map_err(|e| OpError::Failed(e.to_string()))?
        .to_path_buf();

    let filter = match config.target_layout {
        AudioLayout::Stereo => format!(
            "[0:a:{source_position}]aresample=matrix_encoding=dplii,\
             pan=stereo|FL=FC+0.30*FL+0.30*BL|FR=FC+0.30*FR+0.30*BR[downmix]"
        ),
        AudioLayout::Surround51 => format!(
            "[0:a:{source_position}]pan=5.1|FL=FL|FR=FR|FC=FC|LFE=LFE|\
             BL=0.5*BL+0.5*SL|BR=0.5*BR+0.5*SR[downmix]"
        ),
    };

    let temp = temp_output_path(&state.file_path, ctx.temp_directory);
    let new_audio_index = audio.len();
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        state.file_path.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[downmix]".to_string(),
        format!("-c:a:{new_audio_index}"),
        config.codec.clone(),
    ];
    if let Some(bitrate) = &config.bitrate {
        args.push(format!("-b:a:{new_audio_index}"));
        args.push(bitrate.clone());
    }
    args.push(temp.to_string_lossy().into_owned());

    info!(
        "Synthesizing {} track from audio stream {} ({} ch)",
        config.target_layout.as_str(),
        source_position,
        source.channels.unwrap_or(0)
    );

    let output = run_tool(&ffmpeg, &args, None, |_| {})
        .await
        .map_err(|e| OpError::Failed(e.to_string()))?;
    if !output.success {
        let _ = std::fs::remove_file(&temp);
        return Err(OpError::Failed(format!(
            "audio synthesis failed: {}",
            output.tail_text()
        )));
    }

    replace_with_temp(&temp, &state.file_path, &state.file_path, false, "ffmpeg")
        .map_err(|e| OpError::Failed(e.to_string()))?;

    refresh_catalog(ctx, &state.file_path).await;

    state
        .audio_synthesis_created
        .push(config.target_layout.as_str().to_string());
    Ok(1)
}

/// Analyze audio tracks through the transcription plugin and persist the
/// results. A missing plugin logs and skips without failing the phase.
pub(crate) async fn execute_transcription(
    ctx: &OpContext<'_>,
    state: &mut PhaseExecutionState,
) -> Result<i64, OpError> {
    let Some(config) = state.phase.transcription.clone() else {
        return Ok(0);
    };
    if !config.enabled {
        return Ok(0);
    }

    let Some(plugin) = ctx.plugins.transcription() else {
        info!("Transcription requested but no plugin registered; skipping");
        return Ok(0);
    };

    let file = load_file_context(ctx.pool, &state.file_path).await?;
    let audio_tracks: Vec<&TrackInfo> = file
        .tracks
        .iter()
        .filter(|t| t.track_type == TrackType::Audio && t.duration_seconds.is_some())
        .collect();

    if audio_tracks.is_empty() {
        debug!("No audio tracks with duration to transcribe");
        return Ok(0);
    }

    let threshold = config.confidence_threshold.unwrap_or(0.5);
    let mut changes = 0;

    for track in audio_tracks {
        let duration = track.duration_seconds.unwrap_or(0.0);
        let outcome = match plugin.analyze(&state.file_path, track, duration) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Transcription failed for track {}: {e}", track.index);
                continue;
            }
        };

        if outcome.confidence < threshold {
            debug!(
                "Track {} below confidence threshold ({:.2} < {threshold:.2})",
                track.index, outcome.confidence
            );
            continue;
        }

        let Some(track_id) = track.id else {
            warn!("Track {} has no catalog id; cannot persist result", track.index);
            continue;
        };

        let record = vpo_common::db::models::TranscriptionResultRecord {
            id: None,
            track_id,
            detected_language: outcome
                .detected_language
                .as_deref()
                .map(vpo_common::lang::normalize_language),
            confidence_score: outcome.confidence,
            track_type: outcome.track_type.clone(),
            transcript_sample: outcome.transcript_sample.clone(),
            plugin_name: plugin.name().to_string(),
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        };
        db::transcriptions::upsert_transcription_result(ctx.pool, &record).await?;

        state.transcription_results.push(TranscriptionSummary {
            track_index: track.index,
            detected_language: record.detected_language.clone(),
            confidence: outcome.confidence,
            track_type: outcome.track_type,
        });
        changes += 1;
    }

    Ok(changes)
}
