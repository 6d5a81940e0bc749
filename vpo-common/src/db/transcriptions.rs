//! Transcription result cache, one row per track.
//!
//! Upserts use the fail-fast immediate-transaction discipline from
//! `contention`: transcription runs on several workers at once and the
//! ON CONFLICT upsert must not stall behind a long writer.

use std::collections::HashMap;

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};

use super::contention::{with_write_retry, ImmediateTx};
use super::models::TranscriptionResultRecord;

const TRANSCRIPTION_COLUMNS: &str = "id, track_id, detected_language, confidence_score, \
     track_type, transcript_sample, plugin_name, created_at, updated_at";

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> TranscriptionResultRecord {
    TranscriptionResultRecord {
        id: row.get("id"),
        track_id: row.get("track_id"),
        detected_language: row.get("detected_language"),
        confidence_score: row.get("confidence_score"),
        track_type: row.get("track_type"),
        transcript_sample: row.get("transcript_sample"),
        plugin_name: row.get("plugin_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn upsert_inner(
    conn: &mut SqliteConnection,
    record: &TranscriptionResultRecord,
) -> Result<i64> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO transcription_results (
            track_id, detected_language, confidence_score, track_type,
            transcript_sample, plugin_name, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(track_id) DO UPDATE SET
            detected_language = excluded.detected_language,
            confidence_score = excluded.confidence_score,
            track_type = excluded.track_type,
            transcript_sample = excluded.transcript_sample,
            plugin_name = excluded.plugin_name,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(record.track_id)
    .bind(&record.detected_language)
    .bind(record.confidence_score)
    .bind(&record.track_type)
    .bind(&record.transcript_sample)
    .bind(&record.plugin_name)
    .bind(&record.created_at)
    .bind(&record.updated_at)
    .fetch_optional(&mut *conn)
    .await?;

    id.ok_or_else(|| {
        Error::Integrity(format!(
            "transcription upsert returned no row for track_id={}",
            record.track_id
        ))
    })
}

/// Insert or update the transcription result for a track.
pub async fn upsert_transcription_result(
    pool: &SqlitePool,
    record: &TranscriptionResultRecord,
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
pub async fn upsert_transcription_result_in_tx(
    conn: &mut SqliteConnection,
    record: &TranscriptionResultRecord,
) -> Result<i64> {
    upsert_inner(conn, record).await
}

pub async fn get_transcription_result(
    pool: &SqlitePool,
    track_id: i64,
) -> Result<Option<TranscriptionResultRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {TRANSCRIPTION_COLUMNS} FROM transcription_results WHERE track_id = ?"
    ))
    .bind(track_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_record))
}

/// Results for a set of tracks, keyed by track id.
pub async fn get_transcriptions_for_tracks(
    pool: &SqlitePool,
    track_ids: &[i64],
) -> Result<HashMap<i64, TranscriptionResultRecord>> {
    if track_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut qb = sqlx::QueryBuilder::new(format!(
        "SELECT {TRANSCRIPTION_COLUMNS} FROM transcription_results WHERE track_id IN ("
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

/// Remove all transcription results for tracks of a file.
pub async fn delete_transcription_results_for_file(
    pool: &SqlitePool,
    file_id: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM transcription_results \
         WHERE track_id IN (SELECT id FROM tracks WHERE file_id = ?)",
    )
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
