//! Supervisor: heartbeat reaping and job retention.
//!
//! A running job whose worker stopped heartbeating is dead weight: its
//! worker crashed or the host rebooted mid-run. The supervisor fails such
//! jobs with a structured error so the file becomes eligible for a fresh
//! enqueue, and prunes terminal jobs past the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vpo_common::config::DaemonConfig;
use vpo_common::db::{self, JobStatus};

pub struct Supervisor {
    pub pool: SqlitePool,
    pub config: Arc<DaemonConfig>,
    pub shutdown: CancellationToken,
}

impl Supervisor {
    pub async fn run(self) {
        info!("Supervisor started");
        let interval = Duration::from_secs(self.config.supervisor_interval_secs.max(1));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.cancelled() => break,
            }

            if let Err(e) = self.reap_stale_jobs().await {
                warn!("Heartbeat reap pass failed: {e}");
            }
            if let Err(e) = self.enforce_retention().await {
                warn!("Retention pass failed: {e}");
            }
        }

        info!("Supervisor stopped");
    }

    /// Fail running jobs whose heartbeat is older than the stale
    /// threshold.
    pub async fn reap_stale_jobs(&self) -> vpo_common::Result<u64> {
        let stale_before = (Utc::now()
            - chrono::Duration::seconds(self.config.heartbeat_stale_secs as i64))
        .to_rfc3339();

        let stale = db::jobs::get_stale_running_jobs(&self.pool, &stale_before).await?;
        let mut reaped = 0;
        for job in stale {
            let message = format!(
                "worker heartbeat timed out (last heartbeat: {}, threshold: {}s)",
                job.worker_heartbeat.as_deref().unwrap_or("never"),
                self.config.heartbeat_stale_secs
            );
            warn!(job_id = %job.id, "Reaping stale job: {message}");
            db::jobs::update_job_status(&self.pool, job.id, JobStatus::Failed, Some(&message))
                .await?;
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Delete terminal jobs older than the retention window.
    pub async fn enforce_retention(&self) -> vpo_common::Result<u64> {
        let older_than = (Utc::now()
            - chrono::Duration::days(self.config.job_retention_days as i64))
        .to_rfc3339();

        let deleted = db::jobs::delete_old_jobs(&self.pool, &older_than, None).await?;
        if deleted > 0 {
            info!("Retention removed {deleted} old job(s)");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpo_common::db::init::init_memory_database;
    use vpo_common::db::{Job, JobType};

    fn supervisor(pool: SqlitePool) -> Supervisor {
        Supervisor {
            pool,
            config: Arc::new(DaemonConfig::default()),
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn stale_running_job_is_reaped_to_failed() {
        let pool = init_memory_database().await.unwrap();
        let job = Job::new(JobType::Process, "/m/a.mkv");
        db::jobs::insert_job(&pool, &job).await.unwrap();
        db::jobs::claim_next_job(&pool, 1234).await.unwrap();

        // Pretend the worker died hours ago.
        sqlx::query("UPDATE jobs SET worker_heartbeat = '2020-01-01T00:00:00+00:00' WHERE id = ?")
            .bind(job.id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let supervisor = supervisor(pool.clone());
        let reaped = supervisor.reap_stale_jobs().await.unwrap();
        assert_eq!(reaped, 1);

        let reaped_job = db::jobs::get_job(&pool, job.id).await.unwrap().unwrap();
        assert_eq!(reaped_job.status, JobStatus::Failed);
        assert!(reaped_job
            .error_message
            .unwrap()
            .contains("heartbeat timed out"));
        assert!(reaped_job.completed_at.is_some());

        // The file is free for a fresh enqueue.
        assert!(!db::jobs::has_active_job_for_path(&pool, "/m/a.mkv")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn healthy_running_job_is_left_alone() {
        let pool = init_memory_database().await.unwrap();
        let job = Job::new(JobType::Process, "/m/a.mkv");
        db::jobs::insert_job(&pool, &job).await.unwrap();
        db::jobs::claim_next_job(&pool, 1234).await.unwrap();

        let supervisor = supervisor(pool.clone());
        let reaped = supervisor.reap_stale_jobs().await.unwrap();
        assert_eq!(reaped, 0);

        let untouched = db::jobs::get_job(&pool, job.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn retention_removes_old_terminal_jobs() {
        let pool = init_memory_database().await.unwrap();

        let mut old = Job::new(JobType::Scan, "/library");
        old.created_at = "2020-01-01T00:00:00+00:00".to_string();
        db::jobs::insert_job(&pool, &old).await.unwrap();
        db::jobs::update_job_status(&pool, old.id, JobStatus::Completed, None)
            .await
            .unwrap();

        let supervisor = supervisor(pool.clone());
        let deleted = supervisor.enforce_retention().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(db::jobs::get_job(&pool, old.id).await.unwrap().is_none());
    }
}
