//! Processing statistics capture and reporting views.

use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::helpers::clamp_limit;
use super::models::{
    ActionResultRecord, PerformanceMetricRecord, ProcessingStatsRecord,
};

fn row_to_stats(row: &sqlx::sqlite::SqliteRow) -> Result<ProcessingStatsRecord> {
    let id: String = row.get("id");
    Ok(ProcessingStatsRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Integrity(format!("malformed stats id {id:?}: {e}")))?,
        file_id: row.get("file_id"),
        processed_at: row.get("processed_at"),
        policy_name: row.get("policy_name"),
        size_before: row.get("size_before"),
        size_after: row.get("size_after"),
        size_change: row.get("size_change"),
        audio_tracks_before: row.get("audio_tracks_before"),
        subtitle_tracks_before: row.get("subtitle_tracks_before"),
        attachments_before: row.get("attachments_before"),
        audio_tracks_after: row.get("audio_tracks_after"),
        subtitle_tracks_after: row.get("subtitle_tracks_after"),
        attachments_after: row.get("attachments_after"),
        audio_tracks_removed: row.get("audio_tracks_removed"),
        subtitle_tracks_removed: row.get("subtitle_tracks_removed"),
        attachments_removed: row.get("attachments_removed"),
        duration_seconds: row.get("duration_seconds"),
        phases_completed: row.get("phases_completed"),
        phases_total: row.get("phases_total"),
        total_changes: row.get("total_changes"),
        video_source_codec: row.get("video_source_codec"),
        video_target_codec: row.get("video_target_codec"),
        video_transcode_skipped: row.get::<i64, _>("video_transcode_skipped") == 1,
        video_skip_reason: row.get("video_skip_reason"),
        audio_tracks_transcoded: row.get("audio_tracks_transcoded"),
        audio_tracks_preserved: row.get("audio_tracks_preserved"),
        hash_before: row.get("hash_before"),
        hash_after: row.get("hash_after"),
        success: row.get::<i64, _>("success") == 1,
        error_message: row.get("error_message"),
        encoder_type: row.get("encoder_type"),
        job_id: row.get("job_id"),
    })
}

async fn insert_stats_row(
    conn: &mut SqliteConnection,
    record: &ProcessingStatsRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO processing_stats (
            id, file_id, processed_at, policy_name,
            size_before, size_after, size_change,
            audio_tracks_before, subtitle_tracks_before, attachments_before,
            audio_tracks_after, subtitle_tracks_after, attachments_after,
            audio_tracks_removed, subtitle_tracks_removed, attachments_removed,
            duration_seconds, phases_completed, phases_total, total_changes,
            video_source_codec, video_target_codec,
            video_transcode_skipped, video_skip_reason,
            audio_tracks_transcoded, audio_tracks_preserved,
            hash_before, hash_after, success, error_message,
            encoder_type, job_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                  ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.file_id)
    .bind(&record.processed_at)
    .bind(&record.policy_name)
    .bind(record.size_before)
    .bind(record.size_after)
    .bind(record.size_change)
    .bind(record.audio_tracks_before)
    .bind(record.subtitle_tracks_before)
    .bind(record.attachments_before)
    .bind(record.audio_tracks_after)
    .bind(record.subtitle_tracks_after)
    .bind(record.attachments_after)
    .bind(record.audio_tracks_removed)
    .bind(record.subtitle_tracks_removed)
    .bind(record.attachments_removed)
    .bind(record.duration_seconds)
    .bind(record.phases_completed)
    .bind(record.phases_total)
    .bind(record.total_changes)
    .bind(&record.video_source_codec)
    .bind(&record.video_target_codec)
    .bind(record.video_transcode_skipped as i64)
    .bind(&record.video_skip_reason)
    .bind(record.audio_tracks_transcoded)
    .bind(record.audio_tracks_preserved)
    .bind(&record.hash_before)
    .bind(&record.hash_after)
    .bind(record.success as i64)
    .bind(&record.error_message)
    .bind(&record.encoder_type)
    .bind(&record.job_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_action_result(
    conn: &mut SqliteConnection,
    record: &ActionResultRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO action_results (
            stats_id, action_type, track_type, track_index,
            before_state, after_state, success, duration_ms,
            rule_reference, message
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.stats_id.to_string())
    .bind(&record.action_type)
    .bind(&record.track_type)
    .bind(record.track_index)
    .bind(&record.before_state)
    .bind(&record.after_state)
    .bind(record.success as i64)
    .bind(record.duration_ms)
    .bind(&record.rule_reference)
    .bind(&record.message)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_performance_metric(
    conn: &mut SqliteConnection,
    record: &PerformanceMetricRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO performance_metrics (
            stats_id, phase_name, wall_time_seconds,
            bytes_read, bytes_written, encoding_fps, encoding_bitrate
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.stats_id.to_string())
    .bind(&record.phase_name)
    .bind(record.wall_time_seconds)
    .bind(record.bytes_read)
    .bind(record.bytes_written)
    .bind(record.encoding_fps)
    .bind(record.encoding_bitrate)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Persist a processing run: stats row plus its action results and
/// per-phase metrics, atomically.
pub async fn record_processing_stats(
    pool: &SqlitePool,
    stats: &ProcessingStatsRecord,
    actions: &[ActionResultRecord],
    metrics: &[PerformanceMetricRecord],
) -> Result<Uuid> {
    let mut tx = pool.begin().await?;
    insert_stats_row(&mut tx, stats).await?;
    for action in actions {
        insert_action_result(&mut tx, action).await?;
    }
    for metric in metrics {
        insert_performance_metric(&mut tx, metric).await?;
    }
    tx.commit().await?;
    Ok(stats.id)
}

// ============================================================================
// Views
// ============================================================================

/// Aggregate totals across processing runs.
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub total_files_processed: i64,
    pub total_successful: i64,
    pub total_failed: i64,
    pub success_rate: f64,
    pub total_size_before: i64,
    pub total_size_after: i64,
    pub total_size_saved: i64,
    pub avg_savings_percent: f64,
    pub total_audio_removed: i64,
    pub total_subtitles_removed: i64,
    pub total_attachments_removed: i64,
    pub total_videos_transcoded: i64,
    pub total_videos_skipped: i64,
    pub total_audio_transcoded: i64,
    pub avg_processing_time: f64,
    pub earliest_processing: Option<String>,
    pub latest_processing: Option<String>,
    pub hardware_encodes: i64,
    pub software_encodes: i64,
}

/// Per-policy aggregates.
#[derive(Debug, Clone)]
pub struct PolicyStats {
    pub policy_name: String,
    pub files_processed: i64,
    pub success_rate: f64,
    pub total_size_saved: i64,
    pub avg_savings_percent: f64,
    pub audio_tracks_removed: i64,
    pub subtitle_tracks_removed: i64,
    pub attachments_removed: i64,
    pub videos_transcoded: i64,
    pub audio_transcoded: i64,
    pub avg_processing_time: f64,
    pub last_used: Option<String>,
}

/// One processing history entry (list view).
#[derive(Debug, Clone)]
pub struct ProcessingHistoryEntry {
    pub stats_id: Uuid,
    pub processed_at: String,
    pub policy_name: String,
    pub size_before: i64,
    pub size_after: i64,
    pub size_change: i64,
    pub audio_removed: i64,
    pub subtitle_removed: i64,
    pub attachments_removed: i64,
    pub duration_seconds: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub encoder_type: Option<String>,
}

/// Full detail for one processing run.
#[derive(Debug, Clone)]
pub struct StatsDetail {
    pub stats: ProcessingStatsRecord,
    pub actions: Vec<ActionResultRecord>,
    pub metrics: Vec<PerformanceMetricRecord>,
}

/// Filter for the summary view.
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub since: Option<String>,
    pub until: Option<String>,
    pub policy_name: Option<String>,
}

fn push_stats_conditions<'a>(
    qb: &mut sqlx::QueryBuilder<'a, sqlx::Sqlite>,
    filter: &'a StatsFilter,
) {
    let mut first = true;
    let mut sep = |qb: &mut sqlx::QueryBuilder<'a, sqlx::Sqlite>| {
        qb.push(if std::mem::take(&mut first) {
            " WHERE "
        } else {
            " AND "
        });
    };

    if let Some(since) = &filter.since {
        sep(qb);
        qb.push("processed_at >= ").push_bind(since.as_str());
    }
    if let Some(until) = &filter.until {
        sep(qb);
        qb.push("processed_at <= ").push_bind(until.as_str());
    }
    if let Some(policy) = &filter.policy_name {
        sep(qb);
        qb.push("policy_name = ").push_bind(policy.as_str());
    }
}

/// Aggregate statistics summary, optionally filtered by date range and
/// policy name.
pub async fn get_stats_summary(pool: &SqlitePool, filter: &StatsFilter) -> Result<StatsSummary> {
    let mut qb = sqlx::QueryBuilder::new(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0) AS successful,
            COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(size_before), 0) AS size_before,
            COALESCE(SUM(size_after), 0) AS size_after,
            COALESCE(SUM(size_change), 0) AS size_saved,
            COALESCE(SUM(audio_tracks_removed), 0) AS audio_removed,
            COALESCE(SUM(subtitle_tracks_removed), 0) AS subtitles_removed,
            COALESCE(SUM(attachments_removed), 0) AS attachments_removed,
            COALESCE(SUM(CASE WHEN video_target_codec IS NOT NULL
                AND video_transcode_skipped = 0 THEN 1 ELSE 0 END), 0) AS videos_transcoded,
            COALESCE(SUM(video_transcode_skipped), 0) AS videos_skipped,
            COALESCE(SUM(audio_tracks_transcoded), 0) AS audio_transcoded,
            COALESCE(AVG(duration_seconds), 0.0) AS avg_time,
            MIN(processed_at) AS earliest,
            MAX(processed_at) AS latest,
            COALESCE(SUM(CASE WHEN encoder_type = 'hardware' THEN 1 ELSE 0 END), 0) AS hw,
            COALESCE(SUM(CASE WHEN encoder_type = 'software' THEN 1 ELSE 0 END), 0) AS sw
        FROM processing_stats
        "#,
    );
    push_stats_conditions(&mut qb, filter);

    let row = qb.build().fetch_one(pool).await?;

    let total: i64 = row.get("total");
    let successful: i64 = row.get("successful");
    let size_before: i64 = row.get("size_before");
    let size_saved: i64 = row.get("size_saved");

    let success_rate = if total > 0 {
        successful as f64 / total as f64
    } else {
        0.0
    };
    let avg_savings_percent = if size_before > 0 {
        (size_saved as f64 / size_before as f64) * 100.0
    } else {
        0.0
    };

    Ok(StatsSummary {
        total_files_processed: total,
        total_successful: successful,
        total_failed: row.get("failed"),
        success_rate,
        total_size_before: size_before,
        total_size_after: row.get("size_after"),
        total_size_saved: size_saved,
        avg_savings_percent,
        total_audio_removed: row.get("audio_removed"),
        total_subtitles_removed: row.get("subtitles_removed"),
        total_attachments_removed: row.get("attachments_removed"),
        total_videos_transcoded: row.get("videos_transcoded"),
        total_videos_skipped: row.get("videos_skipped"),
        total_audio_transcoded: row.get("audio_transcoded"),
        avg_processing_time: row.get("avg_time"),
        earliest_processing: row.get("earliest"),
        latest_processing: row.get("latest"),
        hardware_encodes: row.get("hw"),
        software_encodes: row.get("sw"),
    })
}

/// Statistics grouped by policy, most-used first.
pub async fn get_policy_stats(
    pool: &SqlitePool,
    filter: &StatsFilter,
    limit: Option<i64>,
) -> Result<Vec<PolicyStats>> {
    let mut qb = sqlx::QueryBuilder::new(
        r#"
        SELECT
            policy_name,
            COUNT(*) AS files_processed,
            SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS successful,
            COALESCE(SUM(size_change), 0) AS size_saved,
            COALESCE(SUM(size_before), 0) AS size_before,
            COALESCE(SUM(audio_tracks_removed), 0) AS audio_removed,
            COALESCE(SUM(subtitle_tracks_removed), 0) AS subtitles_removed,
            COALESCE(SUM(attachments_removed), 0) AS attachments_removed,
            COALESCE(SUM(CASE WHEN video_target_codec IS NOT NULL
                AND video_transcode_skipped = 0 THEN 1 ELSE 0 END), 0) AS videos_transcoded,
            COALESCE(SUM(audio_tracks_transcoded), 0) AS audio_transcoded,
            COALESCE(AVG(duration_seconds), 0.0) AS avg_time,
            MAX(processed_at) AS last_used
        FROM processing_stats
        "#,
    );
    push_stats_conditions(&mut qb, filter);
    qb.push(" GROUP BY policy_name ORDER BY files_processed DESC LIMIT ")
        .push_bind(clamp_limit(limit));

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let files_processed: i64 = row.get("files_processed");
            let successful: i64 = row.get("successful");
            let size_before: i64 = row.get("size_before");
            let size_saved: i64 = row.get("size_saved");
            PolicyStats {
                policy_name: row.get("policy_name"),
                files_processed,
                success_rate: if files_processed > 0 {
                    successful as f64 / files_processed as f64
                } else {
                    0.0
                },
                total_size_saved: size_saved,
                avg_savings_percent: if size_before > 0 {
                    (size_saved as f64 / size_before as f64) * 100.0
                } else {
                    0.0
                },
                audio_tracks_removed: row.get("audio_removed"),
                subtitle_tracks_removed: row.get("subtitles_removed"),
                attachments_removed: row.get("attachments_removed"),
                videos_transcoded: row.get("videos_transcoded"),
                audio_transcoded: row.get("audio_transcoded"),
                avg_processing_time: row.get("avg_time"),
                last_used: row.get("last_used"),
            }
        })
        .collect())
}

/// Recent processing history, newest first.
pub async fn get_recent_stats(
    pool: &SqlitePool,
    policy_name: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<ProcessingHistoryEntry>> {
    let limit = clamp_limit(limit);
    let base = "SELECT id, processed_at, policy_name, size_before, size_after, size_change, \
         audio_tracks_removed, subtitle_tracks_removed, attachments_removed, \
         duration_seconds, success, error_message, encoder_type \
         FROM processing_stats";

    let rows = match policy_name {
        Some(policy) => {
            sqlx::query(&format!(
                "{base} WHERE policy_name = ? ORDER BY processed_at DESC LIMIT ?"
            ))
            .bind(policy)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!("{base} ORDER BY processed_at DESC LIMIT ?"))
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            Ok(ProcessingHistoryEntry {
                stats_id: Uuid::parse_str(&id)
                    .map_err(|e| Error::Integrity(format!("malformed stats id {id:?}: {e}")))?,
                processed_at: row.get("processed_at"),
                policy_name: row.get("policy_name"),
                size_before: row.get("size_before"),
                size_after: row.get("size_after"),
                size_change: row.get("size_change"),
                audio_removed: row.get("audio_tracks_removed"),
                subtitle_removed: row.get("subtitle_tracks_removed"),
                attachments_removed: row.get("attachments_removed"),
                duration_seconds: row.get("duration_seconds"),
                success: row.get::<i64, _>("success") == 1,
                error_message: row.get("error_message"),
                encoder_type: row.get("encoder_type"),
            })
        })
        .collect()
}

/// Processing history for one file, newest first.
pub async fn get_stats_for_file(
    pool: &SqlitePool,
    file_id: i64,
    limit: Option<i64>,
) -> Result<Vec<ProcessingStatsRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM processing_stats WHERE file_id = ? \
         ORDER BY processed_at DESC LIMIT ?",
    )
    .bind(file_id)
    .bind(clamp_limit(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_stats).collect()
}

/// Full detail for one processing run: stats row, per-action results and
/// per-phase metrics.
pub async fn get_stats_detail(pool: &SqlitePool, stats_id: Uuid) -> Result<Option<StatsDetail>> {
    let row = sqlx::query("SELECT * FROM processing_stats WHERE id = ?")
        .bind(stats_id.to_string())
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let stats = row_to_stats(&row)?;

    let action_rows = sqlx::query(
        "SELECT * FROM action_results WHERE stats_id = ? ORDER BY id",
    )
    .bind(stats_id.to_string())
    .fetch_all(pool)
    .await?;
    let actions = action_rows
        .iter()
        .map(|row| ActionResultRecord {
            id: row.get("id"),
            stats_id,
            action_type: row.get("action_type"),
            track_type: row.get("track_type"),
            track_index: row.get("track_index"),
            before_state: row.get("before_state"),
            after_state: row.get("after_state"),
            success: row.get::<i64, _>("success") == 1,
            duration_ms: row.get("duration_ms"),
            rule_reference: row.get("rule_reference"),
            message: row.get("message"),
        })
        .collect();

    let metric_rows = sqlx::query(
        "SELECT * FROM performance_metrics WHERE stats_id = ? ORDER BY id",
    )
    .bind(stats_id.to_string())
    .fetch_all(pool)
    .await?;
    let metrics = metric_rows
        .iter()
        .map(|row| PerformanceMetricRecord {
            id: row.get("id"),
            stats_id,
            phase_name: row.get("phase_name"),
            wall_time_seconds: row.get("wall_time_seconds"),
            bytes_read: row.get("bytes_read"),
            bytes_written: row.get("bytes_written"),
            encoding_fps: row.get("encoding_fps"),
            encoding_bitrate: row.get("encoding_bitrate"),
        })
        .collect();

    Ok(Some(StatsDetail {
        stats,
        actions,
        metrics,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::{tests::sample_file_info, upsert_file_with_tracks};
    use crate::db::init::init_memory_database;
    use crate::db::models::now_timestamp;

    fn stats(file_id: i64, policy: &str, success: bool) -> ProcessingStatsRecord {
        ProcessingStatsRecord {
            id: Uuid::new_v4(),
            file_id,
            processed_at: now_timestamp(),
            policy_name: policy.to_string(),
            size_before: 1000,
            size_after: 600,
            size_change: 400,
            audio_tracks_before: 3,
            subtitle_tracks_before: 2,
            attachments_before: 0,
            audio_tracks_after: 1,
            subtitle_tracks_after: 1,
            attachments_after: 0,
            audio_tracks_removed: 2,
            subtitle_tracks_removed: 1,
            attachments_removed: 0,
            duration_seconds: 12.5,
            phases_completed: 2,
            phases_total: 2,
            total_changes: 5,
            video_source_codec: Some("h264".to_string()),
            video_target_codec: Some("hevc".to_string()),
            video_transcode_skipped: false,
            video_skip_reason: None,
            audio_tracks_transcoded: 0,
            audio_tracks_preserved: 1,
            hash_before: None,
            hash_after: None,
            success,
            error_message: None,
            encoder_type: Some("software".to_string()),
            job_id: None,
        }
    }

    async fn seeded_file(pool: &SqlitePool) -> i64 {
        upsert_file_with_tracks(pool, &sample_file_info("/m/a.mkv"), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn summary_aggregates_and_derives() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;

        record_processing_stats(&pool, &stats(file_id, "default", true), &[], &[])
            .await
            .unwrap();
        record_processing_stats(&pool, &stats(file_id, "default", false), &[], &[])
            .await
            .unwrap();

        let summary = get_stats_summary(&pool, &StatsFilter::default())
            .await
            .unwrap();
        assert_eq!(summary.total_files_processed, 2);
        assert_eq!(summary.total_successful, 1);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(summary.total_size_saved, 800);
        assert_eq!(summary.total_audio_removed, 4);
        assert_eq!(summary.software_encodes, 2);
        // saved / before * 100 = 800/2000 * 100
        assert!((summary.avg_savings_percent - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn invariant_size_change_consistency() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;
        let record = stats(file_id, "default", true);
        assert_eq!(record.size_change, record.size_before - record.size_after);
        assert_eq!(
            record.audio_tracks_removed,
            record.audio_tracks_before - record.audio_tracks_after
        );
        record_processing_stats(&pool, &record, &[], &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn policy_stats_group_by_policy() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;

        record_processing_stats(&pool, &stats(file_id, "movies", true), &[], &[])
            .await
            .unwrap();
        record_processing_stats(&pool, &stats(file_id, "movies", true), &[], &[])
            .await
            .unwrap();
        record_processing_stats(&pool, &stats(file_id, "anime", true), &[], &[])
            .await
            .unwrap();

        let per_policy = get_policy_stats(&pool, &StatsFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(per_policy.len(), 2);
        assert_eq!(per_policy[0].policy_name, "movies");
        assert_eq!(per_policy[0].files_processed, 2);
    }

    #[tokio::test]
    async fn detail_includes_actions_and_metrics() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;
        let record = stats(file_id, "default", true);

        let actions = vec![ActionResultRecord {
            id: None,
            stats_id: record.id,
            action_type: "set_default".to_string(),
            track_type: Some("audio".to_string()),
            track_index: Some(1),
            before_state: Some("{\"is_default\":false}".to_string()),
            after_state: Some("{\"is_default\":true}".to_string()),
            success: true,
            duration_ms: Some(40),
            rule_reference: None,
            message: None,
        }];
        let metrics = vec![PerformanceMetricRecord {
            id: None,
            stats_id: record.id,
            phase_name: "normalize".to_string(),
            wall_time_seconds: 3.25,
            bytes_read: None,
            bytes_written: None,
            encoding_fps: None,
            encoding_bitrate: None,
        }];

        record_processing_stats(&pool, &record, &actions, &metrics)
            .await
            .unwrap();

        let detail = get_stats_detail(&pool, record.id).await.unwrap().unwrap();
        assert_eq!(detail.actions.len(), 1);
        assert_eq!(detail.metrics.len(), 1);
        assert_eq!(detail.metrics[0].phase_name, "normalize");
    }

    #[tokio::test]
    async fn stats_cascade_with_file() {
        let pool = init_memory_database().await.unwrap();
        let file_id = seeded_file(&pool).await;
        let record = stats(file_id, "default", true);
        record_processing_stats(&pool, &record, &[], &[])
            .await
            .unwrap();

        crate::db::files::delete_file(&pool, file_id).await.unwrap();

        assert!(get_stats_detail(&pool, record.id).await.unwrap().is_none());
        let history = get_stats_for_file(&pool, file_id, None).await.unwrap();
        assert!(history.is_empty());
    }
}
