//! Worker: claims jobs, runs handlers, heartbeats, reports terminal
//! status.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vpo_common::config::DaemonConfig;
use vpo_common::db::{self, Job, JobStatus, JobType};
use vpo_common::events::{EventBus, VpoEvent};

use crate::plugin::PluginRegistry;
use crate::tools::ToolAvailability;

use super::handlers;

/// One worker in the pool. Each worker claims and runs jobs end-to-end.
pub struct Worker {
    pub id: usize,
    pub pool: SqlitePool,
    pub config: Arc<DaemonConfig>,
    pub tools: Arc<ToolAvailability>,
    pub plugins: Arc<PluginRegistry>,
    pub events: EventBus,
    pub shutdown: CancellationToken,
}

impl Worker {
    /// Main loop: claim, run, repeat until shutdown.
    pub async fn run(self) {
        info!(worker = self.id, "Worker started");
        let worker_pid = std::process::id() as i64;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match db::jobs::claim_next_job(&self.pool, worker_pid).await {
                Ok(Some(job)) => {
                    self.run_job(job).await;
                }
                Ok(None) => {
                    // Nothing queued; idle until the next poll.
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
                Err(e) => {
                    warn!(worker = self.id, "Claim failed: {e}");
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                }
            }
        }

        info!(worker = self.id, "Worker stopped");
    }

    async fn run_job(&self, job: Job) {
        let job_id = job.id;
        info!(
            worker = self.id,
            job_id = %job_id,
            job_type = job.job_type.as_str(),
            file = %job.file_path,
            "Job started"
        );
        self.events.emit_lossy(VpoEvent::JobStarted {
            job_id,
            job_type: job.job_type.as_str().to_string(),
            file_path: job.file_path.clone(),
            timestamp: chrono::Utc::now(),
        });

        // Heartbeat task: liveness at a cadence no coarser than the
        // configured interval, stopped when the job finishes.
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = {
            let pool = self.pool.clone();
            let stop = heartbeat_stop.clone();
            let interval = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            if let Err(e) = db::jobs::update_job_heartbeat(&pool, job_id).await {
                                warn!(job_id = %job_id, "Heartbeat update failed: {e}");
                            }
                        }
                        _ = stop.cancelled() => break,
                    }
                }
            })
        };

        // Cancellation plumbing: flip the job token when the store shows
        // the job cancelled externally.
        let job_cancel = self.shutdown.child_token();
        let cancel_watch = {
            let pool = self.pool.clone();
            let token = job_cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    match db::jobs::get_job_status(&pool, job_id).await {
                        Ok(Some(JobStatus::Cancelled)) => {
                            token.cancel();
                            break;
                        }
                        Ok(Some(status)) if status.is_terminal() => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!(job_id = %job_id, "Cancellation check failed: {e}");
                        }
                    }
                }
            })
        };

        let outcome = self.dispatch(&job, &job_cancel).await;

        heartbeat_stop.cancel();
        heartbeat.abort();
        cancel_watch.abort();

        // Externally cancelled jobs keep their status; the handler has
        // already cleaned up temps and restored backups.
        let current_status = db::jobs::get_job_status(&self.pool, job_id)
            .await
            .ok()
            .flatten();
        if current_status == Some(JobStatus::Cancelled) {
            info!(job_id = %job_id, "Job cancelled");
            self.events.emit_lossy(VpoEvent::JobFinished {
                job_id,
                status: "cancelled".to_string(),
                error_message: None,
                timestamp: chrono::Utc::now(),
            });
            return;
        }

        match outcome {
            Ok(()) => {
                let _ = db::jobs::update_job_progress(&self.pool, job_id, 100.0, None).await;
                if let Err(e) =
                    db::jobs::update_job_status(&self.pool, job_id, JobStatus::Completed, None)
                        .await
                {
                    error!(job_id = %job_id, "Could not mark job completed: {e}");
                }
                info!(job_id = %job_id, "Job completed");
                self.events.emit_lossy(VpoEvent::JobFinished {
                    job_id,
                    status: "completed".to_string(),
                    error_message: None,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => {
                let message = e.to_string();
                let message = if message.is_empty() {
                    "job handler failed".to_string()
                } else {
                    message
                };
                if let Err(update_err) = db::jobs::update_job_status(
                    &self.pool,
                    job_id,
                    JobStatus::Failed,
                    Some(&message),
                )
                .await
                {
                    error!(job_id = %job_id, "Could not mark job failed: {update_err}");
                }
                error!(job_id = %job_id, "Job failed: {message}");
                self.events.emit_lossy(VpoEvent::JobFinished {
                    job_id,
                    status: "failed".to_string(),
                    error_message: Some(message),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    async fn dispatch(&self, job: &Job, cancel: &CancellationToken) -> anyhow::Result<()> {
        match job.job_type {
            JobType::Scan => {
                handlers::scan::run(&self.pool, &self.config, &self.tools, job, cancel).await
            }
            JobType::Prune => handlers::prune::run(&self.pool, job).await,
            // apply and transcode are the older narrow entry points;
            // their semantics are subsets of process.
            JobType::Process | JobType::Apply | JobType::Transcode => {
                handlers::process::run(
                    &self.pool,
                    &self.config,
                    &self.tools,
                    &self.plugins,
                    &self.events,
                    job,
                    cancel,
                )
                .await
            }
            JobType::Move => handlers::process::run_move(&self.pool, job).await,
        }
    }
}
