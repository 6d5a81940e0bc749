//! Track classification cache (original/dubbed, commentary detection).

use std::collections::HashMap;

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};

use super::contention::{with_write_retry, ImmediateTx};
use super::models::TrackClassificationRecord;

const CLASSIFICATION_COLUMNS: &str = "id, track_id, file_hash, original_dubbed_status, \
     commentary_status, confidence, detection_method, acoustic_profile_json, \
     created_at, updated_at";

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> TrackClassificationRecord {
    TrackClassificationRecord {
        id: row.get("id"),
        track_id: row.get("track_id"),
        file_hash: row.get("file_hash"),
        original_dubbed_status: row.get("original_dubbed_status"),
        commentary_status: row.get("commentary_status"),
        confidence: row.get("confidence"),
        detection_method: row.get("detection_method"),
        acoustic_profile_json: row.get("acoustic_profile_json"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn upsert_inner(
    conn: &mut SqliteConnection,
    record: &TrackClassificationRecord,
) -> Result<i64> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO track_classification_results (
            track_id, file_hash, original_dubbed_status, commentary_status,
            confidence, detection_method, acoustic_profile_json,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(track_id) DO UPDATE SET
            file_hash = excluded.file_hash,
            original_dubbed_status = excluded.original_dubbed_status,
            commentary_status = excluded.commentary_status,
            confidence = excluded.confidence,
            detection_method = excluded.detection_method,
            acoustic_profile_json = excluded.acoustic_profile_json,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(record.track_id)
    .bind(&record.file_hash)
    .bind(&record.original_dubbed_status)
    .bind(&record.commentary_status)
    .bind(record.confidence)
    .bind(&record.detection_method)
    .bind(&record.acoustic_profile_json)
    .bind(&record.created_at)
    .bind(&record.updated_at)
    .fetch_optional(&mut *conn)
    .await?;

    id.ok_or_else(|| {
        Error::Integrity(format!(
            "classification upsert returned no row for track_id={}",
            record.track_id
        ))
    })
}

/// Insert or update the classification for a track.
pub async fn upsert_classification(
    pool: &SqlitePool,
    record: &TrackClassificationRecord,
) -> Result<i64> {
    with_write_retry(|| async {
        let mut tx = ImmediateTx::begin(pool).await?;
        match upsert_inner(tx.conn(), record).await {
            Ok(id) => {
                tx.commit().await?;
                Ok(id)
            }
            Err(e) => {
                tx.rollback().await;
                Err(e)
            }
        }
    })
    .await
}

/// Participating variant for callers already inside a transaction.
pub async fn upsert_classification_in_tx(
    conn: &mut SqliteConnection,
    record: &TrackClassificationRecord,
) -> Result<i64> {
    upsert_inner(conn, record).await
}

pub async fn get_classification(
    pool: &SqlitePool,
    track_id: i64,
) -> Result<Option<TrackClassificationRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {CLASSIFICATION_COLUMNS} FROM track_classification_results WHERE track_id = ?"
    ))
    .bind(track_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_record))
}

/// Classifications for a set of tracks, keyed by track id.
pub async fn get_classifications_for_tracks(
    pool: &SqlitePool,
    track_ids: &[i64],
) -> Result<HashMap<i64, TrackClassificationRecord>> {
    if track_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut qb = sqlx::QueryBuilder::new(format!(
        "SELECT {CLASSIFICATION_COLUMNS} FROM track_classification_results WHERE track_id IN ("
    ));
    let mut separated = qb.separated(", ");
    for id in track_ids {
        separated.push_bind(id);
    }
    qb.push(")");

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(row_to_record)
        .map(|r| (r.track_id, r))
        .collect())
}
