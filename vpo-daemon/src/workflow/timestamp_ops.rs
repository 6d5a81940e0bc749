//! File timestamp operation.
//!
//! After processing, the file's mtime can be restored to its pre-phase
//! value, set to a release date from plugin metadata, or left at "now"
//! (which the OS already did).

use std::path::Path;
use std::time::SystemTime;

use chrono::{NaiveDate, TimeZone, Utc};
use filetime::FileTime;
use tracing::{debug, info, warn};

use vpo_policy::types::{FileTimestampConfig, TimestampFallback, TimestampMode};

use super::ops::{load_file_context, OpContext};
use super::{OpError, PhaseExecutionState};

/// Plugin metadata date keys, in resolution order.
const RADARR_DATE_KEYS: [&str; 3] = ["digital_release", "physical_release", "cinema_release"];
const SONARR_DATE_KEYS: [&str; 2] = ["air_date", "premiere_date"];

pub(crate) async fn execute_file_timestamp(
    ctx: &OpContext<'_>,
    state: &mut PhaseExecutionState,
) -> Result<i64, OpError> {
    let Some(config) = state.phase.file_timestamp.clone() else {
        return Ok(0);
    };

    match config.mode {
        // The OS already stamped the current time on modification.
        TimestampMode::Now => {
            debug!("file_timestamp mode=now: no operation needed");
            Ok(0)
        }
        TimestampMode::Preserve => preserve_mtime(state),
        TimestampMode::ReleaseDate => release_date_mtime(ctx, state, &config).await,
    }
}

fn preserve_mtime(state: &PhaseExecutionState) -> Result<i64, OpError> {
    let Some(original) = state.original_mtime else {
        warn!("file_timestamp mode=preserve but original mtime not captured");
        return Ok(0);
    };

    let current = std::fs::metadata(&state.file_path)
        .and_then(|m| m.modified())
        .map_err(|e| OpError::Failed(format!("cannot read mtime: {e}")))?;

    // Under a second of drift is below timestamp resolution on common
    // filesystems; leave it alone.
    let drift = current
        .duration_since(original)
        .or_else(|_| original.duration_since(current))
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    if drift < 1.0 {
        debug!("File mtime unchanged, skipping restore");
        return Ok(0);
    }

    set_mtime(&state.file_path, original)?;
    info!("Restored file mtime for {}", state.file_path.display());
    Ok(1)
}

async fn release_date_mtime(
    ctx: &OpContext<'_>,
    state: &PhaseExecutionState,
    config: &FileTimestampConfig,
) -> Result<i64, OpError> {
    let file = load_file_context(ctx.pool, &state.file_path).await?;

    let release_date = file
        .plugin_metadata
        .as_ref()
        .and_then(|metadata| find_release_date(metadata, &config.date_source));

    let Some(date_string) = release_date else {
        debug!(
            "No release date in plugin metadata, using fallback: {:?}",
            config.fallback
        );
        return apply_fallback(state, config.fallback);
    };

    let Some(timestamp) = parse_date_to_mtime(&date_string) else {
        warn!("Invalid release date format {date_string:?}");
        return apply_fallback(state, config.fallback);
    };

    set_mtime(&state.file_path, timestamp)?;
    info!("Set file mtime to release date: {date_string}");
    Ok(1)
}

fn apply_fallback(state: &PhaseExecutionState, fallback: TimestampFallback) -> Result<i64, OpError> {
    match fallback {
        TimestampFallback::Skip => {
            debug!("file_timestamp fallback=skip: leaving timestamp as-is");
            Ok(0)
        }
        TimestampFallback::Now => {
            debug!("file_timestamp fallback=now: current timestamp stands");
            Ok(0)
        }
        TimestampFallback::Preserve => preserve_mtime(state),
    }
}

/// Pick the release date from plugin metadata.
///
/// Checks the consolidated `release_date` first, then the per-plugin
/// date keys: digital, physical, cinema for movie managers; air date and
/// premiere for series managers. `date_source` restricts the search to
/// one plugin; `auto` follows the recorded external source or tries both.
pub(crate) fn find_release_date(
    metadata: &serde_json::Value,
    date_source: &str,
) -> Option<String> {
    let lookup = |plugin: &str, key: &str| -> Option<String> {
        metadata
            .get(plugin)
            .and_then(|v| v.get(key))
            .or_else(|| metadata.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let sources: Vec<&str> = match date_source {
        "auto" => match metadata.get("external_source").and_then(|v| v.as_str()) {
            Some("radarr") => vec!["radarr"],
            Some("sonarr") => vec!["sonarr"],
            _ => vec!["radarr", "sonarr"],
        },
        other => vec![other],
    };

    // The consolidated primary date wins regardless of source.
    for source in &sources {
        if let Some(date) = lookup(source, "release_date") {
            return Some(date);
        }
    }
    if let Some(date) = metadata.get("release_date").and_then(|v| v.as_str()) {
        return Some(date.to_string());
    }

    for source in sources {
        let keys: &[&str] = match source {
            "radarr" => &RADARR_DATE_KEYS,
            "sonarr" => &SONARR_DATE_KEYS,
            _ => &[],
        };
        for key in keys {
            if let Some(date) = lookup(source, key) {
                return Some(date);
            }
        }
    }
    None
}

/// `YYYY-MM-DD` to midnight UTC.
pub(crate) fn parse_date_to_mtime(date: &str) -> Option<SystemTime> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let midnight = parsed.and_hms_opt(0, 0, 0)?;
    let utc = Utc.from_utc_datetime(&midnight);
    Some(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(utc.timestamp().max(0) as u64))
}

fn set_mtime(path: &Path, time: SystemTime) -> Result<(), OpError> {
    filetime::set_file_mtime(path, FileTime::from_system_time(time))
        .map_err(|e| OpError::Failed(format!("cannot set mtime: {e}")))
}
