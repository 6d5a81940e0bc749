//! Database maintenance operations (VACUUM, integrity checks).

use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::error::Result;

/// One foreign-key violation reported by the database.
#[derive(Debug, Clone)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fkid: i64,
}

/// Outcome of the integrity and foreign-key checks.
#[derive(Debug, Clone)]
pub struct IntegrityResult {
    pub integrity_ok: bool,
    pub integrity_errors: Vec<String>,
    pub foreign_key_ok: bool,
    pub foreign_key_errors: Vec<ForeignKeyViolation>,
}

impl IntegrityResult {
    pub fn is_ok(&self) -> bool {
        self.integrity_ok && self.foreign_key_ok
    }
}

/// Outcome of VACUUM/ANALYZE (or its dry-run estimate).
#[derive(Debug, Clone)]
pub struct OptimizeResult {
    pub size_before: i64,
    pub size_after: i64,
    pub space_saved: i64,
    pub freelist_pages: i64,
    pub dry_run: bool,
}

/// Run SQLite integrity and foreign key checks, returning structured
/// violations.
pub async fn run_integrity_check(pool: &SqlitePool) -> Result<IntegrityResult> {
    let integrity_rows = sqlx::query("PRAGMA integrity_check")
        .fetch_all(pool)
        .await?;
    let integrity_errors: Vec<String> = integrity_rows
        .iter()
        .map(|row| row.get::<String, _>(0))
        .filter(|message| message != "ok")
        .collect();

    let fk_rows = sqlx::query("PRAGMA foreign_key_check").fetch_all(pool).await?;
    let foreign_key_errors: Vec<ForeignKeyViolation> = fk_rows
        .iter()
        .map(|row| ForeignKeyViolation {
            table: row.get(0),
            rowid: row.get(1),
            parent: row.get(2),
            fkid: row.get(3),
        })
        .collect();

    Ok(IntegrityResult {
        integrity_ok: integrity_errors.is_empty(),
        integrity_errors,
        foreign_key_ok: foreign_key_errors.is_empty(),
        foreign_key_errors,
    })
}

/// Run VACUUM and ANALYZE.
///
/// In dry-run mode, reports the current freelist count times the page size
/// as the reclaimable estimate without touching the database.
pub async fn run_optimize(pool: &SqlitePool, dry_run: bool) -> Result<OptimizeResult> {
    let mut conn = pool.acquire().await?;

    let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
        .fetch_one(conn.as_mut())
        .await?;
    let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
        .fetch_one(conn.as_mut())
        .await?;
    let freelist_count: i64 = sqlx::query_scalar("PRAGMA freelist_count")
        .fetch_one(conn.as_mut())
        .await?;
    let size_before = page_size * page_count;

    if dry_run {
        let estimated_savings = freelist_count * page_size;
        return Ok(OptimizeResult {
            size_before,
            size_after: size_before - estimated_savings,
            space_saved: estimated_savings,
            freelist_pages: freelist_count,
            dry_run: true,
        });
    }

    // Clear any stray transaction state before VACUUM; committing unknown
    // work would be unsafe, so roll it back instead.
    if sqlx::query("ROLLBACK").execute(conn.as_mut()).await.is_ok() {
        warn!("Rolled back a pending transaction before VACUUM");
    }

    sqlx::query("VACUUM").execute(conn.as_mut()).await?;
    sqlx::query("ANALYZE").execute(conn.as_mut()).await?;

    let page_count_after: i64 = sqlx::query_scalar("PRAGMA page_count")
        .fetch_one(conn.as_mut())
        .await?;
    let size_after = page_size * page_count_after;

    Ok(OptimizeResult {
        size_before,
        size_after,
        space_saved: size_before - size_after,
        freelist_pages: freelist_count,
        dry_run: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn fresh_database_passes_checks() {
        let pool = init_memory_database().await.unwrap();
        let result = run_integrity_check(&pool).await.unwrap();
        assert!(result.is_ok());
        assert!(result.integrity_errors.is_empty());
        assert!(result.foreign_key_errors.is_empty());
    }

    #[tokio::test]
    async fn dry_run_reports_without_vacuuming() {
        let pool = init_memory_database().await.unwrap();
        let result = run_optimize(&pool, true).await.unwrap();
        assert!(result.dry_run);
        assert_eq!(result.space_saved, result.size_before - result.size_after);
    }

    #[tokio::test]
    async fn optimize_runs_vacuum_and_analyze() {
        let pool = init_memory_database().await.unwrap();
        let result = run_optimize(&pool, false).await.unwrap();
        assert!(!result.dry_run);
        assert!(result.size_before > 0);
        assert!(result.size_after > 0);
    }
}
