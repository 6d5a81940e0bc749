//! Job queue CRUD operations.
//!
//! Queue ordering is `priority ASC, created_at ASC` (lower priority value
//! = more urgent). Claims run under `BEGIN IMMEDIATE` so exactly one
//! worker wins any job; contention is absorbed by bounded backoff.

use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::contention::{backoff_delay, is_busy_error};
use super::helpers::escape_like_pattern;
use super::models::{now_timestamp, Job, JobStatus, JobType};

/// Whitelist of sortable columns for `list_jobs_filtered`.
const SORTABLE_JOB_COLUMNS: [&str; 5] =
    ["created_at", "job_type", "status", "file_path", "duration"];

const JOB_COLUMNS: &str = "id, file_id, file_path, job_type, status, priority, \
     policy_name, policy_json, progress_percent, progress_json, \
     created_at, started_at, completed_at, worker_pid, worker_heartbeat, \
     output_path, backup_path, error_message, \
     files_affected_json, summary_json, log_path, origin, batch_id";

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let job_type: String = row.get("job_type");
    let status: String = row.get("status");

    Ok(Job {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Integrity(format!("malformed job id {id:?}: {e}")))?,
        file_id: row.get("file_id"),
        file_path: row.get("file_path"),
        job_type: JobType::parse(&job_type)?,
        status: JobStatus::parse(&status)?,
        priority: row.get("priority"),
        policy_name: row.get("policy_name"),
        policy_json: row.get("policy_json"),
        progress_percent: row.get("progress_percent"),
        progress_json: row.get("progress_json"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        worker_pid: row.get("worker_pid"),
        worker_heartbeat: row.get("worker_heartbeat"),
        output_path: row.get("output_path"),
        backup_path: row.get("backup_path"),
        error_message: row.get("error_message"),
        files_affected_json: row.get("files_affected_json"),
        summary_json: row.get("summary_json"),
        log_path: row.get("log_path"),
        origin: row.get("origin"),
        batch_id: row.get("batch_id"),
    })
}

/// Insert a new job. Priority and progress are validated at this boundary
/// before the database CHECK ever sees them.
pub async fn insert_job(pool: &SqlitePool, job: &Job) -> Result<Uuid> {
    if !(0..=1000).contains(&job.priority) {
        return Err(Error::InvalidInput(format!(
            "job priority {} out of range 0..=1000",
            job.priority
        )));
    }
    if !(0.0..=100.0).contains(&job.progress_percent) {
        return Err(Error::InvalidInput(format!(
            "job progress {} out of range 0..=100",
            job.progress_percent
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, file_id, file_path, job_type, status, priority,
            policy_name, policy_json, progress_percent, progress_json,
            created_at, started_at, completed_at,
            worker_pid, worker_heartbeat,
            output_path, backup_path, error_message,
            files_affected_json, summary_json, log_path,
            origin, batch_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.file_id)
    .bind(&job.file_path)
    .bind(job.job_type.as_str())
    .bind(job.status.as_str())
    .bind(job.priority)
    .bind(&job.policy_name)
    .bind(&job.policy_json)
    .bind(job.progress_percent)
    .bind(&job.progress_json)
    .bind(&job.created_at)
    .bind(&job.started_at)
    .bind(&job.completed_at)
    .bind(job.worker_pid)
    .bind(&job.worker_heartbeat)
    .bind(&job.output_path)
    .bind(&job.backup_path)
    .bind(&job.error_message)
    .bind(&job.files_affected_json)
    .bind(&job.summary_json)
    .bind(&job.log_path)
    .bind(&job.origin)
    .bind(&job.batch_id)
    .execute(pool)
    .await?;

    Ok(job.id)
}

pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_job).transpose()
}

/// Claim the next queued job for a worker.
///
/// Runs `queued -> running` under BEGIN IMMEDIATE, stamping `started_at`,
/// `worker_pid` and `worker_heartbeat`. Exactly one worker can claim any
/// job; lock contention retries with bounded exponential backoff.
pub async fn claim_next_job(pool: &SqlitePool, worker_pid: i64) -> Result<Option<Job>> {
    const MAX_ATTEMPTS: u32 = 5;
    let mut last_error: Option<Error> = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt - 1)).await;
        }

        match try_claim(pool, worker_pid).await {
            Ok(job) => return Ok(job),
            Err(e) if is_busy_error(&e) => {
                debug!(attempt, "claim contention, backing off");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Contention(format!(
        "could not claim a job: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

async fn try_claim(pool: &SqlitePool, worker_pid: i64) -> Result<Option<Job>> {
    let mut conn = pool.acquire().await?;

    sqlx::query("BEGIN IMMEDIATE")
        .execute(conn.as_mut())
        .await
        .map_err(Error::from)?;

    match claim_in_tx(conn.as_mut(), worker_pid).await {
        Ok(job) => {
            sqlx::query("COMMIT")
                .execute(conn.as_mut())
                .await
                .map_err(Error::from)?;
            Ok(job)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(conn.as_mut()).await;
            Err(e)
        }
    }
}

async fn claim_in_tx(conn: &mut SqliteConnection, worker_pid: i64) -> Result<Option<Job>> {
    let job_id: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM jobs
        WHERE status = 'queued'
        ORDER BY priority ASC, created_at ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *conn)
    .await?;

    let Some(job_id) = job_id else {
        return Ok(None);
    };

    let now = now_timestamp();
    let claimed = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'running', started_at = ?, worker_pid = ?, worker_heartbeat = ?
        WHERE id = ? AND status = 'queued'
        "#,
    )
    .bind(&now)
    .bind(worker_pid)
    .bind(&now)
    .bind(&job_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if claimed == 0 {
        // Lost the race to another worker between SELECT and UPDATE.
        return Ok(None);
    }

    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
        .bind(&job_id)
        .fetch_one(&mut *conn)
        .await?;
    row_to_job(&row).map(Some)
}

/// Move a job to a new status.
///
/// Terminal statuses stamp `completed_at` and clear the worker columns so
/// `worker_pid` is only ever non-null while running. Failed jobs must
/// carry an error message.
pub async fn update_job_status(
    pool: &SqlitePool,
    job_id: Uuid,
    status: JobStatus,
    error_message: Option<&str>,
) -> Result<bool> {
    if status == JobStatus::Failed && error_message.map(str::is_empty).unwrap_or(true) {
        return Err(Error::InvalidInput(
            "failed jobs require an error message".to_string(),
        ));
    }

    let result = if status.is_terminal() {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, error_message = ?, completed_at = ?,
                worker_pid = NULL, worker_heartbeat = NULL
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(now_timestamp())
        .bind(job_id.to_string())
        .execute(pool)
        .await?
    } else {
        sqlx::query("UPDATE jobs SET status = ?, error_message = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error_message)
            .bind(job_id.to_string())
            .execute(pool)
            .await?
    };

    Ok(result.rows_affected() > 0)
}

/// Update progress. Never blocks queue claims: plain autocommit UPDATE.
pub async fn update_job_progress(
    pool: &SqlitePool,
    job_id: Uuid,
    progress_percent: f64,
    progress_json: Option<&str>,
) -> Result<bool> {
    let clamped = progress_percent.clamp(0.0, 100.0);
    let result = sqlx::query(
        "UPDATE jobs SET progress_percent = ?, progress_json = ? WHERE id = ?",
    )
    .bind(clamped)
    .bind(progress_json)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Refresh the worker heartbeat for a running job.
pub async fn update_job_heartbeat(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE jobs SET worker_heartbeat = ? WHERE id = ? AND status = 'running'",
    )
    .bind(now_timestamp())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record result paths for a finished job.
pub async fn update_job_output(
    pool: &SqlitePool,
    job_id: Uuid,
    output_path: Option<&str>,
    backup_path: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE jobs SET output_path = ?, backup_path = ? WHERE id = ?")
        .bind(output_path)
        .bind(backup_path)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Record the type-specific summary blob.
pub async fn update_job_summary(pool: &SqlitePool, job_id: Uuid, summary_json: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE jobs SET summary_json = ? WHERE id = ?")
        .bind(summary_json)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Request cancellation of a queued or running job.
///
/// Cancelling an already-terminal job is a no-op (returns false). The
/// owning worker observes the status flip at its next checkpoint.
pub async fn cancel_job(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'cancelled', completed_at = ?,
            worker_pid = NULL, worker_heartbeat = NULL
        WHERE id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(now_timestamp())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Current status of a job (cheap checkpoint read for workers).
pub async fn get_job_status(pool: &SqlitePool, job_id: Uuid) -> Result<Option<JobStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    status.as_deref().map(JobStatus::parse).transpose()
}

/// True when the file already has a queued or running job. Enqueue-time
/// admission control: two jobs must never own the same file at once.
pub async fn has_active_job_for_path(pool: &SqlitePool, file_path: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE file_path = ? AND status IN ('queued', 'running')",
    )
    .bind(file_path)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Queued jobs in claim order.
pub async fn get_queued_jobs(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<Job>> {
    let limit = super::helpers::clamp_limit(limit);
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'queued' \
         ORDER BY priority ASC, created_at ASC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_job).collect()
}

pub async fn get_jobs_by_status(
    pool: &SqlitePool,
    status: JobStatus,
    limit: Option<i64>,
) -> Result<Vec<Job>> {
    let limit = super::helpers::clamp_limit(limit);
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ?"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_job).collect()
}

/// Jobs whose UUID starts with `prefix` (operator-facing lookup).
pub async fn get_jobs_by_id_prefix(pool: &SqlitePool, prefix: &str) -> Result<Vec<Job>> {
    let escaped = escape_like_pattern(prefix);
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE id LIKE ? ESCAPE '\\' ORDER BY created_at DESC"
    ))
    .bind(format!("{escaped}%"))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_job).collect()
}

/// Running jobs whose heartbeat is older than `stale_before` (or missing).
pub async fn get_stale_running_jobs(pool: &SqlitePool, stale_before: &str) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE status = 'running' \
           AND (worker_heartbeat IS NULL OR worker_heartbeat < ?)"
    ))
    .bind(stale_before)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_job).collect()
}

/// Flexible filter for operator job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    /// Only jobs created at or after this timestamp.
    pub since: Option<String>,
    /// Case-insensitive substring match on file_path.
    pub search: Option<String>,
    /// One of created_at, job_type, status, file_path, duration.
    pub sort_by: Option<String>,
    /// "asc" or "desc" (default desc).
    pub sort_order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn push_filter_conditions<'a>(
    qb: &mut sqlx::QueryBuilder<'a, sqlx::Sqlite>,
    filter: &'a JobFilter,
) {
    let mut first = true;
    let mut sep = |qb: &mut sqlx::QueryBuilder<'a, sqlx::Sqlite>| {
        qb.push(if std::mem::take(&mut first) {
            " WHERE "
        } else {
            " AND "
        });
    };

    if let Some(status) = filter.status {
        sep(qb);
        qb.push("status = ").push_bind(status.as_str());
    }
    if let Some(job_type) = filter.job_type {
        sep(qb);
        qb.push("job_type = ").push_bind(job_type.as_str());
    }
    if let Some(since) = &filter.since {
        sep(qb);
        qb.push("created_at >= ").push_bind(since.as_str());
    }
    if let Some(search) = &filter.search {
        sep(qb);
        qb.push("LOWER(file_path) LIKE LOWER(")
            .push_bind(format!("%{}%", escape_like_pattern(search)))
            .push(") ESCAPE '\\'");
    }
}

/// Filtered, sorted, paginated job listing. Returns (jobs, total count
/// before pagination).
pub async fn list_jobs_filtered(
    pool: &SqlitePool,
    filter: &JobFilter,
) -> Result<(Vec<Job>, i64)> {
    let mut count_qb = sqlx::QueryBuilder::new("SELECT COUNT(*) FROM jobs");
    push_filter_conditions(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = sqlx::QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
    push_filter_conditions(&mut qb, filter);

    // Sort column accepted only from the whitelist; direction normalized.
    let sort_column = filter
        .sort_by
        .as_deref()
        .filter(|c| SORTABLE_JOB_COLUMNS.contains(c))
        .unwrap_or("created_at");
    let direction = match filter.sort_order.as_deref() {
        Some(o) if o.eq_ignore_ascii_case("asc") => "ASC",
        _ => "DESC",
    };

    if sort_column == "duration" {
        // Duration is computed from completed_at - created_at. Running
        // jobs (NULL completed_at) sort last regardless of direction.
        qb.push(
            " ORDER BY CASE WHEN completed_at IS NULL THEN 1 ELSE 0 END, \
             (julianday(completed_at) - julianday(created_at)) ",
        );
        qb.push(direction);
    } else {
        qb.push(" ORDER BY ");
        qb.push(sort_column);
        qb.push(" ");
        qb.push(direction);
    }

    let limit = super::helpers::clamp_limit(filter.limit);
    qb.push(" LIMIT ").push_bind(limit);
    if let Some(offset) = filter.offset {
        if offset < 0 {
            return Err(Error::InvalidInput(format!("invalid offset: {offset}")));
        }
        qb.push(" OFFSET ").push_bind(offset);
    }

    let rows = qb.build().fetch_all(pool).await?;
    let jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>>>()?;
    Ok((jobs, total))
}

/// Delete terminal jobs created before `older_than`.
///
/// `statuses` restricts which terminal statuses are eligible; defaults to
/// completed, failed and cancelled.
pub async fn delete_old_jobs(
    pool: &SqlitePool,
    older_than: &str,
    statuses: Option<&[JobStatus]>,
) -> Result<u64> {
    let default_statuses = [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];
    let statuses = statuses.unwrap_or(&default_statuses);

    let mut qb = sqlx::QueryBuilder::new("DELETE FROM jobs WHERE created_at < ");
    qb.push_bind(older_than);
    qb.push(" AND status IN (");
    let mut separated = qb.separated(", ");
    for status in statuses {
        separated.push_bind(status.as_str());
    }
    qb.push(")");

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn delete_job(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
