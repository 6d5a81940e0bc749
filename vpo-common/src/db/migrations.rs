//! Database schema migrations
//!
//! Versioned migrations bring databases created by older releases up to
//! the current schema without data loss. Each migration is idempotent:
//! it checks `pragma_table_info` / `sqlite_master` before changing
//! anything, so running it against an already-migrated database is a
//! no-op. Never modify an existing migration; add a new one.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Current schema version
///
/// Increment this when adding a new migration.
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if the schema_version table doesn't exist or has no rows.
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = sqlx::query_scalar(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("Migration v3 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = ?"
    ))
    .bind(column)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Migration v1: add origin and batch_id columns to jobs.
///
/// Jobs created by the CLI and by the daemon used to be indistinguishable;
/// these columns record where a job came from and which CLI batch grouped
/// it.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: add origin/batch_id to jobs");

    if !table_exists(pool, "jobs").await? {
        info!("  jobs table doesn't exist yet - skipping migration");
        return Ok(());
    }

    if !column_exists(pool, "jobs", "origin").await? {
        sqlx::query("ALTER TABLE jobs ADD COLUMN origin TEXT")
            .execute(pool)
            .await?;
        info!("  Added origin column to jobs");
    }

    if !column_exists(pool, "jobs", "batch_id").await? {
        sqlx::query("ALTER TABLE jobs ADD COLUMN batch_id TEXT")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_batch_id ON jobs(batch_id)")
            .execute(pool)
            .await?;
        info!("  Added batch_id column to jobs");
    }

    Ok(())
}

/// Migration v2: widen the jobs job_type CHECK to accept 'prune'.
///
/// SQLite cannot alter a CHECK constraint in place, so the table is
/// recreated and rows copied across. Priorities outside [0, 1000] written
/// by pre-constraint releases are clamped during the copy.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: widen jobs.job_type CHECK");

    if !table_exists(pool, "jobs").await? {
        info!("  jobs table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let ddl: Option<String> = sqlx::query_scalar(
        "SELECT sql FROM sqlite_master WHERE type='table' AND name='jobs'",
    )
    .fetch_optional(pool)
    .await?;
    if ddl.map(|sql| sql.contains("'prune'")).unwrap_or(false) {
        info!("  job_type CHECK already includes prune - skipping");
        return Ok(());
    }

    let mut conn = pool.acquire().await?;

    // Foreign keys must be off while the referenced table is dropped and
    // renamed; the pragma is a no-op inside a transaction.
    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(conn.as_mut())
        .await?;

    let result = recreate_jobs_table(conn.as_mut()).await;

    let _ = sqlx::query("PRAGMA foreign_keys = ON")
        .execute(conn.as_mut())
        .await;

    result
}

async fn recreate_jobs_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN EXCLUSIVE").execute(&mut *conn).await?;

    let work = async {
        sqlx::query(
            r#"
            CREATE TABLE jobs_new (
                id TEXT PRIMARY KEY,
                file_id INTEGER,
                file_path TEXT NOT NULL,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                priority INTEGER NOT NULL DEFAULT 100,
                policy_name TEXT,
                policy_json TEXT,
                progress_percent REAL NOT NULL DEFAULT 0.0,
                progress_json TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                worker_pid INTEGER,
                worker_heartbeat TEXT,
                output_path TEXT,
                backup_path TEXT,
                error_message TEXT,
                files_affected_json TEXT,
                summary_json TEXT,
                log_path TEXT,
                origin TEXT,
                batch_id TEXT,
                FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
                CONSTRAINT valid_status CHECK (
                    status IN ('queued', 'running', 'completed', 'failed', 'cancelled')
                ),
                CONSTRAINT valid_job_type CHECK (
                    job_type IN ('transcode', 'move', 'scan', 'apply', 'process', 'prune')
                ),
                CONSTRAINT valid_progress CHECK (
                    progress_percent >= 0.0 AND progress_percent <= 100.0
                ),
                CONSTRAINT valid_priority CHECK (
                    priority >= 0 AND priority <= 1000
                )
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO jobs_new
            SELECT id, file_id, file_path, job_type, status,
                   CASE WHEN priority < 0 THEN 0
                        WHEN priority > 1000 THEN 1000
                        ELSE priority END,
                   policy_name, policy_json, progress_percent, progress_json,
                   created_at, started_at, completed_at,
                   worker_pid, worker_heartbeat,
                   output_path, backup_path, error_message,
                   files_affected_json, summary_json, log_path,
                   origin, batch_id
            FROM jobs
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query("DROP TABLE jobs").execute(&mut *conn).await?;
        sqlx::query("ALTER TABLE jobs_new RENAME TO jobs")
            .execute(&mut *conn)
            .await?;

        for index_sql in [
            "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_file_id ON jobs(file_id)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_priority_created ON jobs(priority, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_job_type ON jobs(job_type)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_origin ON jobs(origin)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_batch_id ON jobs(batch_id)",
        ] {
            sqlx::query(index_sql).execute(&mut *conn).await?;
        }

        Ok::<(), Error>(())
    }
    .await;

    match work {
        Ok(()) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            info!("  Recreated jobs table with widened job_type CHECK");
            Ok(())
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

/// Migration v3: add encoder_type and job_id columns to processing_stats.
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v3: add encoder_type/job_id to processing_stats");

    if !table_exists(pool, "processing_stats").await? {
        info!("  processing_stats table doesn't exist yet - skipping migration");
        return Ok(());
    }

    if !column_exists(pool, "processing_stats", "encoder_type").await? {
        sqlx::query("ALTER TABLE processing_stats ADD COLUMN encoder_type TEXT")
            .execute(pool)
            .await?;
        info!("  Added encoder_type column to processing_stats");
    }

    if !column_exists(pool, "processing_stats", "job_id").await? {
        sqlx::query("ALTER TABLE processing_stats ADD COLUMN job_id TEXT")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stats_job ON processing_stats(job_id)")
            .execute(pool)
            .await?;
        info!("  Added job_id column to processing_stats");
    }

    Ok(())
}
