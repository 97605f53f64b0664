//! Durable video record store
//!
//! Single owner of the `videos` table. Every other component mutates
//! records only through the typed operations here, and the one true
//! synchronization primitive is [`VideoStore::try_acquire_for_processing`]:
//! a single conditional UPDATE, never two round-trips.

use anyhow::{Context, Result};
use chrono::Utc;
use common::models::video::{
    CallbackStatus, VideoPatch, VideoRecord, VideoStatus, MAX_CALLBACK_ATTEMPTS,
};
use sqlx::sqlite::SqlitePool;
use tracing::debug;

/// Embedded schema migrations, run by the binary at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the record store. Cheap to clone (wraps a pool).
#[derive(Clone)]
pub struct VideoStore {
    pool: SqlitePool,
}

impl VideoStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a fresh record. Fails if the id already exists.
    pub async fn create(&self, record: &VideoRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO videos (
                id, filename, status, progress,
                stream_url, thumbnail_url, mp4_url,
                created_at, completed_at, error, packager,
                callback_url, callback_status, callback_retry_count, callback_last_attempt,
                s3_path, upload_to_s3, upload_type
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.filename)
        .bind(record.status)
        .bind(record.progress)
        .bind(&record.stream_url)
        .bind(&record.thumbnail_url)
        .bind(&record.mp4_url)
        .bind(record.created_at)
        .bind(record.completed_at)
        .bind(&record.error)
        .bind(&record.packager)
        .bind(&record.callback_url)
        .bind(record.callback_status)
        .bind(record.callback_retry_count)
        .bind(record.callback_last_attempt)
        .bind(&record.s3_path)
        .bind(record.upload_to_s3)
        .bind(record.upload_type)
        .execute(&self.pool)
        .await
        .context("Failed to insert video record")?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<VideoRecord>> {
        let record = sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch video record")?;

        Ok(record)
    }

    /// Apply a partial update under the row's implicit lock.
    ///
    /// `None` fields are left untouched. A patch carrying
    /// `status = completed` also stamps `completed_at`. Records already
    /// completed are immutable through this path, which keeps the terminal
    /// state monotonic (callback fields have their own operations).
    pub async fn update(&self, id: &str, patch: VideoPatch) -> Result<()> {
        let completing = patch.status == Some(VideoStatus::Completed);

        sqlx::query(
            r#"
            UPDATE videos SET
                status = COALESCE(?, status),
                progress = COALESCE(?, progress),
                stream_url = COALESCE(?, stream_url),
                thumbnail_url = COALESCE(?, thumbnail_url),
                mp4_url = COALESCE(?, mp4_url),
                error = COALESCE(?, error),
                completed_at = CASE WHEN ? THEN ? ELSE completed_at END
            WHERE id = ? AND status != 'completed'
            "#,
        )
        .bind(patch.status)
        .bind(patch.progress)
        .bind(&patch.stream_url)
        .bind(&patch.thumbnail_url)
        .bind(&patch.mp4_url)
        .bind(&patch.error)
        .bind(completing)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update video record")?;

        Ok(())
    }

    /// Advance progress within a processing run. Monotonic: a value below
    /// the current one is ignored, so interleaved coarse updates can never
    /// move the bar backwards. Resets go through `update` or the dedicated
    /// retry/acquire statements.
    pub async fn set_progress(&self, id: &str, progress: i64) -> Result<()> {
        sqlx::query(
            "UPDATE videos SET progress = MAX(progress, ?) WHERE id = ? AND status != 'completed'",
        )
        .bind(progress)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update progress")?;

        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.update(id, VideoPatch::failed(error)).await
    }

    /// Retry path: a previously failed record re-enters processing with
    /// progress 25 and a cleared error.
    pub async fn reset_for_retry(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE videos SET progress = 25, error = NULL WHERE id = ? AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to reset record for retry")?;

        Ok(())
    }

    /// All records, newest first. Admin listing view.
    pub async fn list_all(&self) -> Result<Vec<VideoRecord>> {
        let records =
            sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await
                .context("Failed to list video records")?;

        Ok(records)
    }

    /// Completed records whose webhook still needs delivering, oldest first.
    pub async fn list_pending_callbacks(&self) -> Result<Vec<VideoRecord>> {
        let records = sqlx::query_as::<_, VideoRecord>(
            r#"
            SELECT * FROM videos
            WHERE callback_url IS NOT NULL
              AND callback_status = 'pending'
              AND callback_retry_count < ?
              AND status = 'completed'
            ORDER BY created_at ASC
            "#,
        )
        .bind(MAX_CALLBACK_ATTEMPTS)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending callbacks")?;

        Ok(records)
    }

    /// The atomic processing guard.
    ///
    /// In one statement, transition the record to `processing` with
    /// progress 10 iff it is in `uploading` or `failed`, or in `processing`
    /// with progress <= 10 (a worker that died before meaningful progress).
    /// A record past progress 10 is NOT re-acquired; duplicates of the same
    /// queue message observe that and skip.
    pub async fn try_acquire_for_processing(&self, id: &str) -> Result<(bool, Option<VideoRecord>)> {
        let result = sqlx::query(
            r#"
            UPDATE videos SET status = 'processing', progress = 10
            WHERE id = ?
              AND (status IN ('uploading', 'failed')
                   OR (status = 'processing' AND progress <= 10))
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to run processing acquire")?;

        let acquired = result.rows_affected() == 1;
        let record = self.get(id).await?;
        debug!(upload_id = %id, acquired, "processing acquire attempted");

        Ok((acquired, record))
    }

    /// Record one webhook delivery attempt and return the resulting status.
    ///
    /// A 200 outcome is terminal. Any other outcome bumps the retry count
    /// and flips to `failed` once the attempt budget is spent. Terminal
    /// callback states are never mutated again.
    pub async fn record_callback_attempt(&self, id: &str, success: bool) -> Result<CallbackStatus> {
        let now = Utc::now();

        if success {
            sqlx::query(
                r#"
                UPDATE videos
                SET callback_status = 'completed', callback_last_attempt = ?
                WHERE id = ? AND callback_status = 'pending'
                "#,
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to record callback success")?;
        } else {
            sqlx::query(
                r#"
                UPDATE videos
                SET callback_retry_count = callback_retry_count + 1,
                    callback_last_attempt = ?,
                    callback_status = CASE
                        WHEN callback_retry_count + 1 >= ? THEN 'failed'
                        ELSE callback_status
                    END
                WHERE id = ? AND callback_status = 'pending'
                "#,
            )
            .bind(now)
            .bind(MAX_CALLBACK_ATTEMPTS)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to record callback failure")?;
        }

        let record = self
            .get(id)
            .await?
            .context("Record vanished while recording callback attempt")?;

        Ok(record.callback_status)
    }
}
