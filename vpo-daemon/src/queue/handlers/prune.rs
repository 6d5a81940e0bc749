//! Prune handler: drop catalog rows whose file vanished from disk.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use vpo_common::db::{self, Job};

#[derive(Debug, Default, Serialize)]
pub struct PruneSummary {
    pub files_checked: u64,
    pub files_pruned: u64,
}

pub async fn run(pool: &SqlitePool, job: &Job) -> anyhow::Result<()> {
    let files = db::files::list_all_files(pool).await?;
    let mut summary = PruneSummary {
        files_checked: files.len() as u64,
        ..Default::default()
    };

    let total = files.len().max(1) as f64;
    for (position, (file_id, path)) in files.iter().enumerate() {
        if !std::path::Path::new(path).exists() {
            info!("Pruning missing file from catalog: {path}");
            db::files::delete_file(pool, *file_id).await?;
            summary.files_pruned += 1;
        }

        let percent = ((position + 1) as f64 / total) * 100.0;
        let _ = db::jobs::update_job_progress(pool, job.id, percent, None).await;
    }

    let summary_json = serde_json::to_string(&summary)?;
    db::jobs::update_job_summary(pool, job.id, &summary_json).await?;

    info!(
        job_id = %job.id,
        checked = summary.files_checked,
        pruned = summary.files_pruned,
        "Prune complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use vpo_common::db::init::init_memory_database;
    use vpo_common::db::JobType;
    use vpo_common::{FileInfo, ScanStatus};

    fn info_for(path: &std::path::Path) -> FileInfo {
        FileInfo {
            path: path.to_path_buf(),
            size_bytes: 10,
            modified_at: Utc::now(),
            content_hash: None,
            container_format: Some("matroska".to_string()),
            scanned_at: Utc::now(),
            scan_status: ScanStatus::Ok,
            scan_error: None,
            tracks: Vec::new(),
            container_tags: BTreeMap::new(),
            plugin_metadata: None,
        }
    }

    #[tokio::test]
    async fn prune_removes_only_missing_files() {
        let pool = init_memory_database().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let kept_path = dir.path().join("kept.mkv");
        std::fs::write(&kept_path, b"data").unwrap();
        db::files::upsert_file_with_tracks(&pool, &info_for(&kept_path), None)
            .await
            .unwrap();

        let gone_path = dir.path().join("gone.mkv");
        db::files::upsert_file_with_tracks(&pool, &info_for(&gone_path), None)
            .await
            .unwrap();

        let job = db::Job::new(JobType::Prune, "");
        db::jobs::insert_job(&pool, &job).await.unwrap();

        run(&pool, &job).await.unwrap();

        let remaining = db::files::list_all_files(&pool).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].1.ends_with("kept.mkv"));

        let finished = db::jobs::get_job(&pool, job.id).await.unwrap().unwrap();
        let summary: serde_json::Value =
            serde_json::from_str(finished.summary_json.as_deref().unwrap()).unwrap();
        assert_eq!(summary["files_checked"], 2);
        assert_eq!(summary["files_pruned"], 1);
    }
}
