//! Policy operation audit log.
//!
//! One row per policy application attempt, independent of the plan
//! approval workflow. Terminal statuses stamp `completed_at`.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::models::{now_timestamp, OperationRecord, OperationStatus};

const OPERATION_COLUMNS: &str = "id, file_id, file_path, policy_name, policy_version, \
     actions_json, status, error_message, backup_path, started_at, completed_at";

fn row_to_operation_record(row: &sqlx::sqlite::SqliteRow) -> Result<OperationRecord> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    Ok(OperationRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Integrity(format!("malformed operation id {id:?}: {e}")))?,
        file_id: row.get("file_id"),
        file_path: row.get("file_path"),
        policy_name: row.get("policy_name"),
        policy_version: row.get("policy_version"),
        actions_json: row.get("actions_json"),
        status: OperationStatus::parse(&status)?,
        error_message: row.get("error_message"),
        backup_path: row.get("backup_path"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

/// Create a new operation record in PENDING status.
pub async fn create_operation(
    pool: &SqlitePool,
    file_id: i64,
    file_path: &str,
    policy_name: &str,
    policy_version: i64,
    actions_json: &str,
) -> Result<OperationRecord> {
    let record = OperationRecord {
        id: Uuid::new_v4(),
        file_id,
        file_path: file_path.to_string(),
        policy_name: policy_name.to_string(),
        policy_version,
        actions_json: actions_json.to_string(),
        status: OperationStatus::Pending,
        error_message: None,
        backup_path: None,
        started_at: now_timestamp(),
        completed_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO operations (
            id, file_id, file_path, policy_name, policy_version,
            actions_json, status, started_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.file_id)
    .bind(&record.file_path)
    .bind(&record.policy_name)
    .bind(record.policy_version)
    .bind(&record.actions_json)
    .bind(record.status.as_str())
    .bind(&record.started_at)
    .execute(pool)
    .await?;

    Ok(record)
}

/// Update the status of an operation. Terminal statuses stamp
/// `completed_at`.
pub async fn update_operation_status(
    pool: &SqlitePool,
    operation_id: Uuid,
    status: OperationStatus,
    error_message: Option<&str>,
    backup_path: Option<&str>,
) -> Result<bool> {
    let completed_at = status.is_terminal().then(now_timestamp);

    let result = sqlx::query(
        r#"
        UPDATE operations SET
            status = ?, error_message = ?, backup_path = ?, completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(backup_path)
    .bind(completed_at)
    .bind(operation_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_operation(
    pool: &SqlitePool,
    operation_id: Uuid,
) -> Result<Option<OperationRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?"
    ))
    .bind(operation_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_operation_record).transpose()
}

/// Operations still in PENDING or IN_PROGRESS, oldest first.
pub async fn get_pending_operations(pool: &SqlitePool) -> Result<Vec<OperationRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {OPERATION_COLUMNS} FROM operations \
         WHERE status IN ('PENDING', 'IN_PROGRESS') ORDER BY started_at"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_operation_record).collect()
}

/// Operation history for a file, newest first.
pub async fn get_operations_for_file(
    pool: &SqlitePool,
    file_id: i64,
) -> Result<Vec<OperationRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {OPERATION_COLUMNS} FROM operations \
         WHERE file_id = ? ORDER BY started_at DESC"
    ))
    .bind(file_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_operation_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::upsert_file_with_tracks;
    use crate::db::init::init_memory_database;

    async fn seeded_file(pool: &SqlitePool) -> i64 {
        let info = crate::db::files::tests::sample_file_info("/m/a.mkv");
        upsert_file_with_tracks(pool, &info, None).await.unwrap()
    }

    #[tokio::test]
    async fn lifecycle_stamps_completed_at() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;

        let op = create_operation(&pool, file_id, "/m/a.mkv", "default", 1, "[]")
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Pending);

        update_operation_status(&pool, op.id, OperationStatus::InProgress, None, None)
            .await
            .unwrap();
        let running = get_operation(&pool, op.id).await.unwrap().unwrap();
        assert!(running.completed_at.is_none());

        update_operation_status(
            &pool,
            op.id,
            OperationStatus::RolledBack,
            Some("tool failed"),
            Some("/m/a.mkv.vpo-backup"),
        )
        .await
        .unwrap();
        let done = get_operation(&pool, op.id).await.unwrap().unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.status, OperationStatus::RolledBack);
        assert_eq!(done.backup_path.as_deref(), Some("/m/a.mkv.vpo-backup"));
    }

    #[tokio::test]
    async fn pending_listing_excludes_terminal() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;

        let a = create_operation(&pool, file_id, "/m/a.mkv", "default", 1, "[]")
            .await
            .unwrap();
        let b = create_operation(&pool, file_id, "/m/a.mkv", "default", 1, "[]")
            .await
            .unwrap();
        update_operation_status(&pool, b.id, OperationStatus::Completed, None, None)
            .await
            .unwrap();

        let pending = get_pending_operations(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
    }

    #[tokio::test]
    async fn operations_cascade_on_file_delete() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;
        create_operation(&pool, file_id, "/m/a.mkv", "default", 1, "[]")
            .await
            .unwrap();

        crate::db::files::delete_file(&pool, file_id).await.unwrap();

        let remaining = get_operations_for_file(&pool, file_id).await.unwrap();
        assert!(remaining.is_empty());
    }
}
