//! Track catalog operations.
//!
//! Tracks are keyed by `(file_id, track_index)`. Re-scans go through a
//! smart merge that updates existing indices in place, inserts new ones
//! and deletes indices that disappeared, so track row ids (and everything
//! cascaded from them: transcriptions, analyses, classifications) stay
//! stable across re-scans.

use std::collections::BTreeSet;

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::domain::{TrackInfo, TrackType};
use crate::error::Result;

use super::models::TrackRecord;

fn row_to_track_record(row: &sqlx::sqlite::SqliteRow) -> TrackRecord {
    let track_type: String = row.get("track_type");
    TrackRecord {
        id: row.get("id"),
        file_id: row.get("file_id"),
        track_index: row.get("track_index"),
        track_type: TrackType::parse(&track_type),
        codec: row.get("codec"),
        language: row.get("language"),
        title: row.get("title"),
        is_default: row.get::<i64, _>("is_default") == 1,
        is_forced: row.get::<i64, _>("is_forced") == 1,
        channels: row.get("channels"),
        channel_layout: row.get("channel_layout"),
        width: row.get("width"),
        height: row.get("height"),
        frame_rate: row.get("frame_rate"),
        color_transfer: row.get("color_transfer"),
        color_primaries: row.get("color_primaries"),
        color_space: row.get("color_space"),
        color_range: row.get("color_range"),
        duration_seconds: row.get("duration_seconds"),
    }
}

/// Smart-merge the track list for a file.
///
/// UPDATEs rows whose index already exists, INSERTs new indices, DELETEs
/// indices absent from `tracks`. Does not commit; the caller owns the
/// transaction so the parent file upsert and its tracks land atomically.
pub async fn upsert_tracks_for_file(
    conn: &mut SqliteConnection,
    file_id: i64,
    tracks: &[TrackInfo],
) -> Result<()> {
    let existing: BTreeSet<i64> =
        sqlx::query("SELECT track_index FROM tracks WHERE file_id = ?")
            .bind(file_id)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| row.get::<i64, _>("track_index"))
            .collect();

    let incoming: BTreeSet<i64> = tracks.iter().map(|t| t.index).collect();

    for info in tracks {
        let record = TrackRecord::from_track_info(info, file_id);
        if existing.contains(&info.index) {
            sqlx::query(
                r#"
                UPDATE tracks SET
                    track_type = ?, codec = ?, language = ?, title = ?,
                    is_default = ?, is_forced = ?,
                    channels = ?, channel_layout = ?,
                    width = ?, height = ?, frame_rate = ?,
                    color_transfer = ?, color_primaries = ?,
                    color_space = ?, color_range = ?,
                    duration_seconds = ?
                WHERE file_id = ? AND track_index = ?
                "#,
            )
            .bind(record.track_type.as_str())
            .bind(&record.codec)
            .bind(&record.language)
            .bind(&record.title)
            .bind(record.is_default as i64)
            .bind(record.is_forced as i64)
            .bind(record.channels)
            .bind(&record.channel_layout)
            .bind(record.width)
            .bind(record.height)
            .bind(&record.frame_rate)
            .bind(&record.color_transfer)
            .bind(&record.color_primaries)
            .bind(&record.color_space)
            .bind(&record.color_range)
            .bind(record.duration_seconds)
            .bind(file_id)
            .bind(record.track_index)
            .execute(&mut *conn)
            .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO tracks (
                    file_id, track_index, track_type, codec, language, title,
                    is_default, is_forced, channels, channel_layout,
                    width, height, frame_rate,
                    color_transfer, color_primaries, color_space, color_range,
                    duration_seconds
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file_id)
            .bind(record.track_index)
            .bind(record.track_type.as_str())
            .bind(&record.codec)
            .bind(&record.language)
            .bind(&record.title)
            .bind(record.is_default as i64)
            .bind(record.is_forced as i64)
            .bind(record.channels)
            .bind(&record.channel_layout)
            .bind(record.width)
            .bind(record.height)
            .bind(&record.frame_rate)
            .bind(&record.color_transfer)
            .bind(&record.color_primaries)
            .bind(&record.color_space)
            .bind(&record.color_range)
            .bind(record.duration_seconds)
            .execute(&mut *conn)
            .await?;
        }
    }

    for gone in existing.difference(&incoming) {
        sqlx::query("DELETE FROM tracks WHERE file_id = ? AND track_index = ?")
            .bind(file_id)
            .bind(gone)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// All tracks for a file, ordered by index.
pub async fn get_tracks_for_file(pool: &SqlitePool, file_id: i64) -> Result<Vec<TrackRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM tracks WHERE file_id = ? ORDER BY track_index",
    )
    .bind(file_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_track_record).collect())
}

/// Track row id for `(file_id, track_index)`, if present.
pub async fn get_track_id(
    pool: &SqlitePool,
    file_id: i64,
    track_index: i64,
) -> Result<Option<i64>> {
    let id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM tracks WHERE file_id = ? AND track_index = ?")
            .bind(file_id)
            .bind(track_index)
            .fetch_optional(pool)
            .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::{self, upsert_file_with_tracks};
    use crate::db::init::init_memory_database;
    use crate::domain::{FileInfo, ScanStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn file_with_tracks(path: &str, tracks: Vec<TrackInfo>) -> FileInfo {
        FileInfo {
            path: path.into(),
            size_bytes: 1,
            modified_at: Utc::now(),
            content_hash: None,
            container_format: Some("matroska".to_string()),
            scanned_at: Utc::now(),
            scan_status: ScanStatus::Ok,
            scan_error: None,
            tracks,
            container_tags: BTreeMap::new(),
            plugin_metadata: None,
        }
    }

    fn audio(index: i64, lang: &str) -> TrackInfo {
        let mut t = TrackInfo::new(index, TrackType::Audio);
        t.codec = Some("aac".to_string());
        t.language = Some(lang.to_string());
        t
    }

    #[tokio::test]
    async fn merge_preserves_row_ids_across_rescans() {
        let pool = init_memory_database().await.unwrap();
        let info = file_with_tracks("/m/a.mkv", vec![audio(0, "eng"), audio(1, "jpn")]);
        let file_id = upsert_file_with_tracks(&pool, &info, None).await.unwrap();

        let before = get_tracks_for_file(&pool, file_id).await.unwrap();

        // Re-scan with a changed title on track 0.
        let mut rescan = info.clone();
        rescan.tracks[0].title = Some("Main".to_string());
        upsert_file_with_tracks(&pool, &rescan, None).await.unwrap();

        let after = get_tracks_for_file(&pool, file_id).await.unwrap();
        assert_eq!(before[0].id, after[0].id);
        assert_eq!(after[0].title.as_deref(), Some("Main"));
    }

    #[tokio::test]
    async fn merge_deletes_absent_indices() {
        let pool = init_memory_database().await.unwrap();
        let info = file_with_tracks(
            "/m/a.mkv",
            vec![audio(0, "eng"), audio(1, "jpn"), audio(2, "fra")],
        );
        let file_id = upsert_file_with_tracks(&pool, &info, None).await.unwrap();

        let trimmed = file_with_tracks("/m/a.mkv", vec![audio(0, "eng"), audio(1, "jpn")]);
        upsert_file_with_tracks(&pool, &trimmed, None).await.unwrap();

        let tracks = get_tracks_for_file(&pool, file_id).await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.track_index < 2));
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        let info = file_with_tracks("/m/a.mkv", vec![audio(0, "eng")]);
        let file_id = upsert_file_with_tracks(&pool, &info, None).await.unwrap();

        let first = get_tracks_for_file(&pool, file_id).await.unwrap();
        upsert_file_with_tracks(&pool, &info, None).await.unwrap();
        let second = get_tracks_for_file(&pool, file_id).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unique_index_enforced() {
        let pool = init_memory_database().await.unwrap();
        let info = file_with_tracks("/m/a.mkv", vec![audio(0, "eng")]);
        let file_id = upsert_file_with_tracks(&pool, &info, None).await.unwrap();

        let direct = sqlx::query(
            "INSERT INTO tracks (file_id, track_index, track_type) VALUES (?, 0, 'audio')",
        )
        .bind(file_id)
        .execute(&pool)
        .await;
        assert!(direct.is_err());

        let _ = files::get_file_by_id(&pool, file_id).await.unwrap();
    }
}
