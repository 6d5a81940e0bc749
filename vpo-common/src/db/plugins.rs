//! Plugin acknowledgment tracking.
//!
//! Directory-based plugins must be acknowledged by the operator before
//! their metadata is trusted. Acknowledgment is keyed by
//! `(plugin_name, plugin_hash)` so a changed plugin needs re-approval.

use sqlx::{Row, SqlitePool};

use crate::error::Result;

use super::models::{now_timestamp, PluginAcknowledgment};

/// Record (or refresh) an acknowledgment.
pub async fn acknowledge_plugin(
    pool: &SqlitePool,
    plugin_name: &str,
    plugin_hash: &str,
    acknowledged_by: Option<&str>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO plugin_acknowledgments (
            plugin_name, plugin_hash, acknowledged_at, acknowledged_by
        ) VALUES (?, ?, ?, ?)
        ON CONFLICT(plugin_name, plugin_hash) DO UPDATE SET
            acknowledged_at = excluded.acknowledged_at,
            acknowledged_by = excluded.acknowledged_by
        RETURNING id
        "#,
    )
    .bind(plugin_name)
    .bind(plugin_hash)
    .bind(now_timestamp())
    .bind(acknowledged_by)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// True when this exact plugin content has been acknowledged.
pub async fn is_plugin_acknowledged(
    pool: &SqlitePool,
    plugin_name: &str,
    plugin_hash: &str,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM plugin_acknowledgments WHERE plugin_name = ? AND plugin_hash = ?",
    )
    .bind(plugin_name)
    .bind(plugin_hash)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// All acknowledgments, newest first.
pub async fn list_acknowledgments(pool: &SqlitePool) -> Result<Vec<PluginAcknowledgment>> {
    let rows = sqlx::query(
        "SELECT id, plugin_name, plugin_hash, acknowledged_at, acknowledged_by \
         FROM plugin_acknowledgments ORDER BY acknowledged_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PluginAcknowledgment {
            id: row.get("id"),
            plugin_name: row.get("plugin_name"),
            plugin_hash: row.get("plugin_hash"),
            acknowledged_at: row.get("acknowledged_at"),
            acknowledged_by: row.get("acknowledged_by"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn acknowledgment_is_per_hash() {
        let pool = init_memory_database().await.unwrap();

        acknowledge_plugin(&pool, "radarr", "hash-v1", Some("host-a"))
            .await
            .unwrap();

        assert!(is_plugin_acknowledged(&pool, "radarr", "hash-v1")
            .await
            .unwrap());
        // Changed plugin content requires a new acknowledgment.
        assert!(!is_plugin_acknowledged(&pool, "radarr", "hash-v2")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn re_acknowledging_replaces() {
        let pool = init_memory_database().await.unwrap();

        let first = acknowledge_plugin(&pool, "radarr", "hash-v1", None)
            .await
            .unwrap();
        let second = acknowledge_plugin(&pool, "radarr", "hash-v1", Some("host-b"))
            .await
            .unwrap();
        assert_eq!(first, second);

        let all = list_acknowledgments(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].acknowledged_by.as_deref(), Some("host-b"));
    }
}
