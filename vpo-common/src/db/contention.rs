//! Write-contention handling for unique-by-key cache upserts.
//!
//! SQLite allows one writer at a time. The cache upsert path
//! (transcription, language analysis, classification results) can race
//! between workers, so writes there use fail-fast `BEGIN IMMEDIATE` with
//! a temporarily lowered busy timeout and bounded exponential backoff
//! between attempts. Callers already inside a transaction use the `_in_tx`
//! variants instead and never see a nested BEGIN.

use std::future::Future;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{Error, Result};

const MAX_ATTEMPTS: u32 = 5;
const FAIL_FAST_BUSY_TIMEOUT_MS: i64 = 100;

/// True when the underlying SQLite error is a busy/locked condition.
pub(crate) fn is_busy_error(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db)) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

/// Backoff delay for the given attempt: 50ms, 100ms, 200ms, ... capped at
/// one second, with a small deterministic jitter so two workers that
/// collided do not retry in lockstep.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = 50u64.saturating_mul(1 << attempt.min(5));
    let jitter = u64::from(attempt).wrapping_mul(17) % 40;
    Duration::from_millis(base.min(1000) + jitter)
}

/// Retry an operation on write contention with bounded backoff. The
/// operation builds a fresh attempt each time (acquiring its own
/// connection), so a failed attempt leaves nothing behind.
pub(crate) async fn with_write_retry<T, Fut>(op: impl Fn() -> Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt - 1)).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_busy_error(&e) => {
                debug!(attempt, "write contention, backing off: {e}");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Contention(format!(
        "gave up after {MAX_ATTEMPTS} attempts: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// A fail-fast immediate transaction on a pooled connection.
///
/// On begin, the connection's busy timeout drops to ~100 ms so a held
/// write lock surfaces immediately instead of stalling; commit and
/// rollback restore the prior timeout before the connection returns to
/// the pool.
pub(crate) struct ImmediateTx {
    conn: PoolConnection<Sqlite>,
    prior_busy_timeout: i64,
}

impl ImmediateTx {
    pub(crate) async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;

        let prior_busy_timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(conn.as_mut())
            .await
            .unwrap_or(5000);
        let _ = sqlx::query(&format!(
            "PRAGMA busy_timeout = {FAIL_FAST_BUSY_TIMEOUT_MS}"
        ))
        .execute(conn.as_mut())
        .await;

        if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(conn.as_mut()).await {
            let _ = sqlx::query(&format!("PRAGMA busy_timeout = {prior_busy_timeout}"))
                .execute(conn.as_mut())
                .await;
            return Err(e.into());
        }

        Ok(Self {
            conn,
            prior_busy_timeout,
        })
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        self.conn.as_mut()
    }

    pub(crate) async fn commit(mut self) -> Result<()> {
        let result = sqlx::query("COMMIT").execute(self.conn.as_mut()).await;
        if result.is_err() {
            let _ = sqlx::query("ROLLBACK").execute(self.conn.as_mut()).await;
        }
        self.restore_timeout().await;
        result.map(|_| ()).map_err(Error::from)
    }

    /// Best-effort rollback; the caller's original error matters more.
    pub(crate) async fn rollback(mut self) {
        let _ = sqlx::query("ROLLBACK").execute(self.conn.as_mut()).await;
        self.restore_timeout().await;
    }

    async fn restore_timeout(&mut self) {
        let _ = sqlx::query(&format!(
            "PRAGMA busy_timeout = {}",
            self.prior_busy_timeout
        ))
        .execute(self.conn.as_mut())
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[test]
    fn backoff_grows_and_caps() {
        assert!(backoff_delay(0) < backoff_delay(2));
        assert!(backoff_delay(9) <= Duration::from_millis(1040));
    }

    #[tokio::test]
    async fn immediate_tx_commits_work() {
        let pool = init_memory_database().await.unwrap();

        let mut tx = ImmediateTx::begin(&pool).await.unwrap();
        sqlx::query("INSERT INTO schema_version (version) VALUES (999)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored: i64 =
            sqlx::query_scalar("SELECT version FROM schema_version WHERE version = 999")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored, 999);
    }

    #[tokio::test]
    async fn rollback_discards_work() {
        let pool = init_memory_database().await.unwrap();

        let mut tx = ImmediateTx::begin(&pool).await.unwrap();
        sqlx::query("INSERT INTO schema_version (version) VALUES (998)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.rollback().await;

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT version FROM schema_version WHERE version = 998")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn busy_timeout_is_restored_after_commit() {
        let pool = init_memory_database().await.unwrap();

        let tx = ImmediateTx::begin(&pool).await.unwrap();
        tx.commit().await.unwrap();

        // Single-connection pool: the same connection comes back.
        let timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_ne!(timeout, FAIL_FAST_BUSY_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn retry_returns_non_busy_errors_immediately() {
        let pool = init_memory_database().await.unwrap();

        let result: Result<()> = with_write_retry(|| async {
            let mut tx = ImmediateTx::begin(&pool).await?;
            let outcome = sqlx::query("INSERT INTO no_such_table (x) VALUES (1)")
                .execute(tx.conn())
                .await;
            match outcome {
                Ok(_) => {
                    tx.commit().await?;
                    Ok(())
                }
                Err(e) => {
                    tx.rollback().await;
                    Err(e.into())
                }
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Database(_))));
    }
}
