//! Language analysis cache, one row per track plus owned segments.
//!
//! Upserts replace the analysis row and all of its segments together, and
//! go through the fail-fast immediate-transaction discipline.

use std::collections::HashMap;

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};

use super::contention::{with_write_retry, ImmediateTx};
use super::models::{LanguageAnalysisResultRecord, LanguageSegmentRecord};

const ANALYSIS_COLUMNS: &str = "id, track_id, file_hash, primary_language, primary_percentage, \
     classification, analysis_metadata, created_at, updated_at";

fn row_to_analysis(row: &sqlx::sqlite::SqliteRow) -> LanguageAnalysisResultRecord {
    LanguageAnalysisResultRecord {
        id: row.get("id"),
        track_id: row.get("track_id"),
        file_hash: row.get("file_hash"),
        primary_language: row.get("primary_language"),
        primary_percentage: row.get("primary_percentage"),
        classification: row.get("classification"),
        analysis_metadata: row.get("analysis_metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn upsert_inner(
    conn: &mut SqliteConnection,
    record: &LanguageAnalysisResultRecord,
    segments: &[LanguageSegmentRecord],
) -> Result<i64> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO language_analysis_results (
            track_id, file_hash, primary_language, primary_percentage,
            classification, analysis_metadata, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(track_id) DO UPDATE SET
            file_hash = excluded.file_hash,
            primary_language = excluded.primary_language,
            primary_percentage = excluded.primary_percentage,
            classification = excluded.classification,
            analysis_metadata = excluded.analysis_metadata,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(record.track_id)
    .bind(&record.file_hash)
    .bind(record.primary_language.as_str())
    .bind(record.primary_percentage)
    .bind(&record.classification)
    .bind(&record.analysis_metadata)
    .bind(&record.created_at)
    .bind(&record.updated_at)
    .fetch_optional(&mut *conn)
    .await?;

    let analysis_id = id.ok_or_else(|| {
        Error::Integrity(format!(
            "language analysis upsert returned no row for track_id={}",
            record.track_id
        ))
    })?;

    // Replace segments wholesale; they belong to this analysis run.
    sqlx::query("DELETE FROM language_segments WHERE analysis_id = ?")
        .bind(analysis_id)
        .execute(&mut *conn)
        .await?;

    for segment in segments {
        sqlx::query(
            r#"
            INSERT INTO language_segments (
                analysis_id, language_code, start_time, end_time, confidence
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(analysis_id)
        .bind(&segment.language_code)
        .bind(segment.start_time)
        .bind(segment.end_time)
        .bind(segment.confidence)
        .execute(&mut *conn)
        .await?;
    }

    Ok(analysis_id)
}

/// Insert or replace the language analysis for a track, segments included.
pub async fn upsert_language_analysis(
    pool: &SqlitePool,
    record: &LanguageAnalysisResultRecord,
    segments: &[LanguageSegmentRecord],
) -> Result<i64> {
    with_write_retry(|| async {
        let mut tx = ImmediateTx::begin(pool).await?;
        match upsert_inner(tx.conn(), record, segments).await {
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
pub async fn upsert_language_analysis_in_tx(
    conn: &mut SqliteConnection,
    record: &LanguageAnalysisResultRecord,
    segments: &[LanguageSegmentRecord],
) -> Result<i64> {
    upsert_inner(conn, record, segments).await
}

pub async fn get_language_analysis(
    pool: &SqlitePool,
    track_id: i64,
) -> Result<Option<LanguageAnalysisResultRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {ANALYSIS_COLUMNS} FROM language_analysis_results WHERE track_id = ?"
    ))
    .bind(track_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_analysis))
}

/// Analyses for a set of tracks, keyed by track id.
pub async fn get_language_analyses_for_tracks(
    pool: &SqlitePool,
    track_ids: &[i64],
) -> Result<HashMap<i64, LanguageAnalysisResultRecord>> {
    if track_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut qb = sqlx::QueryBuilder::new(format!(
        "SELECT {ANALYSIS_COLUMNS} FROM language_analysis_results WHERE track_id IN ("
    ));
    let mut separated = qb.separated(", ");
    for id in track_ids {
        separated.push_bind(id);
    }
    qb.push(")");

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(row_to_analysis)
        .map(|r| (r.track_id, r))
        .collect())
}

/// Segments of an analysis, ordered by start time.
pub async fn get_segments_for_analysis(
    pool: &SqlitePool,
    analysis_id: i64,
) -> Result<Vec<LanguageSegmentRecord>> {
    let rows = sqlx::query(
        "SELECT id, analysis_id, language_code, start_time, end_time, confidence \
         FROM language_segments WHERE analysis_id = ? ORDER BY start_time",
    )
    .bind(analysis_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| LanguageSegmentRecord {
            id: row.get("id"),
            analysis_id: row.get("analysis_id"),
            language_code: row.get("language_code"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            confidence: row.get("confidence"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::{tests::sample_file_info, upsert_file_with_tracks};
    use crate::db::init::init_memory_database;
    use crate::db::models::now_timestamp;
    use crate::db::tracks::get_track_id;

    fn analysis(track_id: i64, language: &str) -> LanguageAnalysisResultRecord {
        LanguageAnalysisResultRecord {
            id: None,
            track_id,
            file_hash: "abc123".to_string(),
            primary_language: language.to_string(),
            primary_percentage: 0.85,
            classification: "MULTI_LANGUAGE".to_string(),
            analysis_metadata: None,
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        }
    }

    fn segment(language: &str, start: f64, end: f64) -> LanguageSegmentRecord {
        LanguageSegmentRecord {
            id: None,
            analysis_id: 0,
            language_code: language.to_string(),
            start_time: start,
            end_time: end,
            confidence: 0.9,
        }
    }

    async fn seeded_track(pool: &SqlitePool) -> i64 {
        let file_id = upsert_file_with_tracks(pool, &sample_file_info("/m/a.mkv"), None)
            .await
            .unwrap();
        get_track_id(pool, file_id, 1).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_segments() {
        let pool = init_memory_database().await.unwrap();
        let track_id = seeded_track(&pool).await;

        let id = upsert_language_analysis(
            &pool,
            &analysis(track_id, "eng"),
            &[segment("eng", 0.0, 30.0), segment("jpn", 30.0, 45.0)],
        )
        .await
        .unwrap();
        assert_eq!(get_segments_for_analysis(&pool, id).await.unwrap().len(), 2);

        let id2 = upsert_language_analysis(
            &pool,
            &analysis(track_id, "jpn"),
            &[segment("jpn", 0.0, 45.0)],
        )
        .await
        .unwrap();
        assert_eq!(id, id2);

        let segments = get_segments_for_analysis(&pool, id).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].language_code, "jpn");
    }

    #[tokio::test]
    async fn segment_time_order_constraint_holds() {
        let pool = init_memory_database().await.unwrap();
        let track_id = seeded_track(&pool).await;

        // end_time <= start_time violates the CHECK
        let result = upsert_language_analysis(
            &pool,
            &analysis(track_id, "eng"),
            &[segment("eng", 30.0, 30.0)],
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bulk_lookup_for_tracks() {
        let pool = init_memory_database().await.unwrap();
        let track_id = seeded_track(&pool).await;
        upsert_language_analysis(&pool, &analysis(track_id, "eng"), &[])
            .await
            .unwrap();

        let map = get_language_analyses_for_tracks(&pool, &[track_id])
            .await
            .unwrap();
        assert_eq!(map[&track_id].primary_language, "eng");
    }
}
