//! Database initialization

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

use super::{migrations, schema};

/// Open the catalog database, creating schema and running migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    schema::create_schema(&pool).await?;
    migrations::run_migrations(&pool).await?;

    info!("Catalog database ready: {}", db_path.display());
    Ok(pool)
}

/// In-memory pool with schema, for tests.
///
/// Capped at one connection: every connection to `sqlite::memory:` is a
/// distinct database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    schema::create_schema(&pool).await?;
    migrations::run_migrations(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("library").join("vpo.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn memory_database_has_schema() {
        let pool = init_memory_database().await.unwrap();
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type='table'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(count > 10);
    }
}
