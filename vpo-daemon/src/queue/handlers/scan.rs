//! Scan handler: walk a directory tree, introspect media files, upsert
//! the catalog.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use vpo_common::config::DaemonConfig;
use vpo_common::db::{self, Job};

use crate::tools::{FfprobeIntrospector, ToolAvailability};

/// Extensions the scanner treats as media containers.
const MEDIA_EXTENSIONS: [&str; 8] = ["mkv", "mp4", "m4v", "avi", "mov", "ts", "webm", "wmv"];

/// Summary blob stored on the scan job.
#[derive(Debug, Default, Serialize)]
pub struct ScanSummary {
    pub files_discovered: u64,
    pub files_updated: u64,
    pub files_errored: u64,
}

fn is_media_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let lowered = ext.to_string_lossy().to_lowercase();
            MEDIA_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

fn collect_candidates(root: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_media_file(entry.path()) {
                    candidates.push(entry.path().to_path_buf());
                }
            }
            Err(e) => {
                warn!("Error accessing entry: {e}");
                // Continue scanning, don't abort.
            }
        }
    }
    candidates.sort();
    candidates
}

pub async fn run(
    pool: &SqlitePool,
    config: &Arc<DaemonConfig>,
    tools: &ToolAvailability,
    job: &Job,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let ffprobe = tools
        .require("ffprobe")
        .context("scan requires ffprobe")?
        .to_path_buf();
    let introspector = FfprobeIntrospector::new(ffprobe);

    // A scan job names one root; an empty path scans every configured
    // library root.
    let roots: Vec<PathBuf> = if job.file_path.is_empty() {
        config.library_roots.clone()
    } else {
        vec![PathBuf::from(&job.file_path)]
    };
    if roots.is_empty() {
        bail!("no library roots to scan");
    }

    let mut summary = ScanSummary::default();
    let job_id_string = job.id.to_string();

    let mut candidates = Vec::new();
    for root in &roots {
        if !root.is_dir() {
            bail!("scan root is not a directory: {}", root.display());
        }
        candidates.extend(collect_candidates(root));
    }
    summary.files_discovered = candidates.len() as u64;
    info!(
        job_id = %job.id,
        "Scan discovered {} candidate file(s)",
        candidates.len()
    );

    let total = candidates.len().max(1) as f64;
    for (position, path) in candidates.iter().enumerate() {
        if cancel.is_cancelled() {
            bail!("job cancelled");
        }

        match introspector.probe(path).await {
            Ok(info) => {
                match db::files::upsert_file_with_tracks(pool, &info, Some(&job_id_string)).await {
                    Ok(_) => summary.files_updated += 1,
                    Err(e) => {
                        warn!("Catalog upsert failed for {}: {e}", path.display());
                        summary.files_errored += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Probe failed for {}: {e}", path.display());
                summary.files_errored += 1;

                // Record the failure on the catalog row so the error is
                // visible in library views.
                if let Ok(Some(record)) =
                    db::files::get_file_by_path(pool, &path.to_string_lossy()).await
                {
                    if let Some(file_id) = record.id {
                        let _ = sqlx::query(
                            "UPDATE files SET scan_status = 'error', scan_error = ?, scanned_at = ? WHERE id = ?",
                        )
                        .bind(e.to_string())
                        .bind(db::models::now_timestamp())
                        .bind(file_id)
                        .execute(pool)
                        .await;
                    }
                }
            }
        }

        let percent = ((position + 1) as f64 / total) * 100.0;
        let _ = db::jobs::update_job_progress(pool, job.id, percent, None).await;
    }

    let summary_json = serde_json::to_string(&summary)?;
    db::jobs::update_job_summary(pool, job.id, &summary_json).await?;

    info!(
        job_id = %job.id,
        discovered = summary.files_discovered,
        updated = summary.files_updated,
        errored = summary.files_errored,
        "Scan complete"
    );
    Ok(())
}
