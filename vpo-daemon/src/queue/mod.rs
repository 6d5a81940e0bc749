//! Durable job queue orchestration: enqueue admission, the worker pool
//! and the supervisor.

pub mod handlers;
pub mod supervisor;
pub mod worker;

use sqlx::SqlitePool;
use uuid::Uuid;

use vpo_common::db::{self, Job, JobType};
use vpo_common::error::{Error, Result};

/// Enqueue a job, enforcing file-based admission control.
///
/// Two jobs must never own the same file at once, so a file with a
/// queued or running job cannot be enqueued again. Scan and prune jobs
/// operate on directory trees and skip the check.
pub async fn enqueue_job(pool: &SqlitePool, job: &Job) -> Result<Uuid> {
    let file_scoped = matches!(
        job.job_type,
        JobType::Process | JobType::Apply | JobType::Transcode | JobType::Move
    );
    if file_scoped && db::jobs::has_active_job_for_path(pool, &job.file_path).await? {
        return Err(Error::InvalidInput(format!(
            "file already has an active job: {}",
            job.file_path
        )));
    }

    db::jobs::insert_job(pool, job).await
}
