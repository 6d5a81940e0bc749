//! File catalog operations.

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::domain::{FileInfo, ScanStatus, TrackInfo};
use crate::error::{Error, Result};

use super::helpers::escape_like_pattern;
use super::models::{now_timestamp, FileRecord};
use super::tracks;

fn row_to_file_record(row: &sqlx::sqlite::SqliteRow) -> FileRecord {
    let status: String = row.get("scan_status");
    FileRecord {
        id: row.get("id"),
        path: row.get("path"),
        filename: row.get("filename"),
        directory: row.get("directory"),
        extension: row.get("extension"),
        size_bytes: row.get("size_bytes"),
        modified_at: row.get("modified_at"),
        content_hash: row.get("content_hash"),
        container_format: row.get("container_format"),
        scanned_at: row.get("scanned_at"),
        scan_status: ScanStatus::parse(&status).unwrap_or(ScanStatus::Pending),
        scan_error: row.get("scan_error"),
        job_id: row.get("job_id"),
        plugin_metadata: row.get("plugin_metadata"),
        container_tags: row.get("container_tags"),
    }
}

const FILE_COLUMNS: &str = "id, path, filename, directory, extension, size_bytes, \
     modified_at, content_hash, container_format, scanned_at, scan_status, \
     scan_error, job_id, plugin_metadata, container_tags";

/// Insert or update a file record keyed by path. Returns the row id.
///
/// Does not commit; the caller owns the transaction so the file row and
/// its tracks land atomically.
pub async fn upsert_file_record(
    conn: &mut SqliteConnection,
    record: &FileRecord,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO files (
            path, filename, directory, extension, size_bytes, modified_at,
            content_hash, container_format, scanned_at, scan_status,
            scan_error, job_id, plugin_metadata, container_tags
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            filename = excluded.filename,
            directory = excluded.directory,
            extension = excluded.extension,
            size_bytes = excluded.size_bytes,
            modified_at = excluded.modified_at,
            content_hash = excluded.content_hash,
            container_format = excluded.container_format,
            scanned_at = excluded.scanned_at,
            scan_status = excluded.scan_status,
            scan_error = excluded.scan_error,
            job_id = COALESCE(excluded.job_id, files.job_id),
            plugin_metadata = COALESCE(excluded.plugin_metadata, files.plugin_metadata),
            container_tags = excluded.container_tags
        RETURNING id
        "#,
    )
    .bind(&record.path)
    .bind(&record.filename)
    .bind(&record.directory)
    .bind(&record.extension)
    .bind(record.size_bytes)
    .bind(&record.modified_at)
    .bind(&record.content_hash)
    .bind(&record.container_format)
    .bind(&record.scanned_at)
    .bind(record.scan_status.as_str())
    .bind(&record.scan_error)
    .bind(&record.job_id)
    .bind(&record.plugin_metadata)
    .bind(&record.container_tags)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::Integrity(format!("file upsert returned no row: {}", record.path)))?;

    Ok(id)
}

/// Upsert a file and its tracks in one transaction. Returns the file id.
pub async fn upsert_file_with_tracks(
    pool: &SqlitePool,
    info: &FileInfo,
    job_id: Option<&str>,
) -> Result<i64> {
    let record = FileRecord::from_file_info(info, job_id);
    let mut tx = pool.begin().await?;
    let file_id = upsert_file_record(&mut tx, &record).await?;
    tracks::upsert_tracks_for_file(&mut tx, file_id, &info.tracks).await?;
    tx.commit().await?;
    Ok(file_id)
}

pub async fn get_file_by_path(pool: &SqlitePool, path: &str) -> Result<Option<FileRecord>> {
    let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?"))
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_file_record))
}

pub async fn get_file_by_id(pool: &SqlitePool, file_id: i64) -> Result<Option<FileRecord>> {
    let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
        .bind(file_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_file_record))
}

/// Delete a file (tracks cascade). Returns true when a row was removed.
pub async fn delete_file(pool: &SqlitePool, file_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM files WHERE id = ?")
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Update a file's path after a container change. Returns false when the
/// file id does not exist.
pub async fn update_file_path(
    conn: &mut SqliteConnection,
    file_id: i64,
    new_path: &str,
) -> Result<bool> {
    let new_filename = std::path::Path::new(new_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let new_extension = std::path::Path::new(new_path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let result = sqlx::query(
        "UPDATE files SET path = ?, filename = ?, extension = ?, container_format = ? WHERE id = ?",
    )
    .bind(new_path)
    .bind(&new_filename)
    .bind(&new_extension)
    .bind(&new_extension)
    .bind(file_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.message().contains("UNIQUE") => Error::InvalidInput(
            format!("cannot update path: {new_path} already exists in catalog"),
        ),
        _ => Error::Database(e),
    })?;

    Ok(result.rows_affected() > 0)
}

/// Mark a file missing (prune candidates that vanished from disk).
pub async fn mark_file_missing(pool: &SqlitePool, file_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE files SET scan_status = 'missing', scanned_at = ? WHERE id = ?",
    )
    .bind(now_timestamp())
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// List all file paths with their ids, ordered by path.
pub async fn list_all_files(pool: &SqlitePool) -> Result<Vec<(i64, String)>> {
    let rows = sqlx::query("SELECT id, path FROM files ORDER BY path")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("id"), row.get("path")))
        .collect())
}

/// Case-insensitive substring search on path.
pub async fn search_files(pool: &SqlitePool, needle: &str, limit: i64) -> Result<Vec<FileRecord>> {
    let escaped = escape_like_pattern(needle);
    let rows = sqlx::query(&format!(
        "SELECT {FILE_COLUMNS} FROM files \
         WHERE LOWER(path) LIKE LOWER(?) ESCAPE '\\' \
         ORDER BY path LIMIT ?"
    ))
    .bind(format!("%{escaped}%"))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_file_record).collect())
}

/// Domain tracks for a file, ready for policy evaluation.
pub async fn get_tracks_as_info(pool: &SqlitePool, file_id: i64) -> Result<Vec<TrackInfo>> {
    let records = tracks::get_tracks_for_file(pool, file_id).await?;
    Ok(super::models::tracks_to_track_info(&records))
}

/// SHA-256 content hash of a file, streamed in chunks.
///
/// Used to validate cached analysis results against the file they were
/// computed from; scan leaves `content_hash` unset unless a caller asks
/// for it.
pub fn calculate_file_hash(file_path: &std::path::Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = std::fs::File::open(file_path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init::init_memory_database;
    use crate::domain::{FileInfo, TrackType};
    use chrono::Utc;
    use std::collections::BTreeMap;

    pub(crate) fn sample_file_info(path: &str) -> FileInfo {
        let mut video = TrackInfo::new(0, TrackType::Video);
        video.codec = Some("hevc".to_string());
        video.width = Some(1920);
        video.height = Some(1080);
        let mut audio = TrackInfo::new(1, TrackType::Audio);
        audio.codec = Some("aac".to_string());
        audio.language = Some("eng".to_string());

        FileInfo {
            path: path.into(),
            size_bytes: 1_000_000,
            modified_at: Utc::now(),
            content_hash: Some("abc123".to_string()),
            container_format: Some("matroska".to_string()),
            scanned_at: Utc::now(),
            scan_status: ScanStatus::Ok,
            scan_error: None,
            tracks: vec![video, audio],
            container_tags: BTreeMap::new(),
            plugin_metadata: None,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let pool = init_memory_database().await.unwrap();
        let info = sample_file_info("/media/movie.mkv");

        let file_id = upsert_file_with_tracks(&pool, &info, Some("job-1"))
            .await
            .unwrap();

        let record = get_file_by_path(&pool, "/media/movie.mkv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id, Some(file_id));
        assert_eq!(record.scan_status, ScanStatus::Ok);
        assert_eq!(record.job_id.as_deref(), Some("job-1"));

        let tracks = get_tracks_as_info(&pool, file_id).await.unwrap();
        assert_eq!(tracks.len(), 2);
    }

    #[tokio::test]
    async fn upsert_by_path_updates_in_place() {
        let pool = init_memory_database().await.unwrap();
        let mut info = sample_file_info("/media/movie.mkv");

        let first_id = upsert_file_with_tracks(&pool, &info, None).await.unwrap();
        info.size_bytes = 2_000_000;
        let second_id = upsert_file_with_tracks(&pool, &info, None).await.unwrap();

        assert_eq!(first_id, second_id);
        let record = get_file_by_id(&pool, first_id).await.unwrap().unwrap();
        assert_eq!(record.size_bytes, 2_000_000);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_tracks() {
        let pool = init_memory_database().await.unwrap();
        let info = sample_file_info("/media/movie.mkv");
        let file_id = upsert_file_with_tracks(&pool, &info, None).await.unwrap();

        assert!(delete_file(&pool, file_id).await.unwrap());

        let track_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tracks WHERE file_id = ?")
                .bind(file_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(track_count, 0);
    }

    #[tokio::test]
    async fn path_update_rejects_collisions() {
        let pool = init_memory_database().await.unwrap();
        let a = upsert_file_with_tracks(&pool, &sample_file_info("/m/a.mkv"), None)
            .await
            .unwrap();
        upsert_file_with_tracks(&pool, &sample_file_info("/m/b.mkv"), None)
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let result = update_file_path(conn.as_mut(), a, "/m/b.mkv").await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn file_hash_is_stable_hex() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        file.write_all(b"same bytes").unwrap();

        let first = calculate_file_hash(file.path()).unwrap();
        let second = calculate_file_hash(file.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[tokio::test]
    async fn search_escapes_like_wildcards() {
        let pool = init_memory_database().await.unwrap();
        upsert_file_with_tracks(&pool, &sample_file_info("/m/100%_legit.mkv"), None)
            .await
            .unwrap();
        upsert_file_with_tracks(&pool, &sample_file_info("/m/other.mkv"), None)
            .await
            .unwrap();

        let hits = search_files(&pool, "100%_", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        // A literal % must not act as a wildcard.
        let misses = search_files(&pool, "100%x", 10).await.unwrap();
        assert!(misses.is_empty());
    }
}
