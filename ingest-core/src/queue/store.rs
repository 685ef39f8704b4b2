//! Postgres-backed implementation of the work queue.
//!
//! Claims use `SELECT ... FOR UPDATE SKIP LOCKED` inside a transaction
//! followed by a conditional `UPDATE ... WHERE status = $expected`, so two
//! workers racing on the same row never both win: the loser's `UPDATE`
//! affects zero rows and is treated as "nothing to claim", not an error.

use super::{Status, WorkItem};
use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new row for `file_path`, or return the existing row
    /// unchanged if one is already present. Idempotent under the unique
    /// index on `file_path`.
    pub async fn add(&self, file_path: &str) -> Result<WorkItem> {
        let row = sqlx::query(
            r#"
            INSERT INTO work_items (id, file_path, status, retry_count, created_at, updated_at)
            VALUES ($1, $2, 'pending', 0, now(), now())
            ON CONFLICT (file_path) DO UPDATE SET file_path = EXCLUDED.file_path
            RETURNING id, file_path, status, movie_code, destination_path, image_url, metadata_json,
                      actress, subtitle, emby_item_id, retry_count,
                      last_error, next_retry_at, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(file_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_item(&row))
    }

    pub async fn get(&self, id: Uuid) -> Result<WorkItem> {
        let row = sqlx::query(
            r#"
            SELECT id, file_path, status, movie_code, destination_path, image_url, metadata_json,
                   actress, subtitle, emby_item_id, retry_count,
                   last_error, next_retry_at, created_at, updated_at
            FROM work_items WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| IngestError::NotFound(id.to_string()))?;

        Ok(row_to_item(&row))
    }

    pub async fn get_by_path(&self, file_path: &str) -> Result<Option<WorkItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, file_path, status, movie_code, destination_path, image_url, metadata_json,
                   actress, subtitle, emby_item_id, retry_count,
                   last_error, next_retry_at, created_at, updated_at
            FROM work_items WHERE file_path = $1
            "#,
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_item(&r)))
    }

    /// Atomically claim the oldest `pending` row, transitioning it to
    /// `processing`. Returns `None` if no row is currently claimable.
    pub async fn claim_pending(&self) -> Result<Option<WorkItem>> {
        self.claim(Status::Pending, Status::Processing).await
    }

    /// Atomically claim the oldest `moved` row, transitioning it to
    /// `emby_pending`.
    pub async fn claim_moved(&self) -> Result<Option<WorkItem>> {
        self.claim(Status::Moved, Status::EmbyPending).await
    }

    async fn claim(&self, from: Status, to: Status) -> Result<Option<WorkItem>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query(
            r#"
            SELECT id FROM work_items
            WHERE status = $1
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(from.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };
        let id: Uuid = candidate.try_get("id")?;

        let updated = sqlx::query(
            r#"
            UPDATE work_items
            SET status = $1, updated_at = now()
            WHERE id = $2 AND status = $3
            RETURNING id, file_path, status, movie_code, destination_path, image_url, metadata_json,
                      actress, subtitle, emby_item_id, retry_count,
                      last_error, next_retry_at, created_at, updated_at
            "#,
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        // A concurrent claimant may have won the row between our SELECT and
        // UPDATE even with SKIP LOCKED (e.g. a retry reset racing in) —
        // treat that as nothing-to-claim rather than an error.
        Ok(updated.map(|r| row_to_item(&r)))
    }

    pub async fn update_status(&self, id: Uuid, status: Status) -> Result<()> {
        sqlx::query("UPDATE work_items SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_movie_code(&self, id: Uuid, movie_code: &str) -> Result<()> {
        sqlx::query("UPDATE work_items SET movie_code = $1, updated_at = now() WHERE id = $2")
            .bind(movie_code)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_image_url(&self, id: Uuid, image_url: &str) -> Result<()> {
        sqlx::query("UPDATE work_items SET image_url = $1, updated_at = now() WHERE id = $2")
            .bind(image_url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the catalog record fetched for this row (as JSON), along
    /// with the derived `actress` and `subtitle` fields the renamer and the
    /// media-server writer both depend on. Called once by the file
    /// processor right after a successful catalog lookup, so the updater
    /// worker can pick the same metadata back up without re-querying the
    /// catalog.
    pub async fn set_metadata(
        &self,
        id: Uuid,
        metadata_json: &str,
        actress: &str,
        subtitle: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET metadata_json = $1, actress = $2, subtitle = $3, updated_at = now()
            WHERE id = $4
            "#,
        )
        .bind(metadata_json)
        .bind(actress)
        .bind(subtitle)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_emby_item_id(&self, id: Uuid, emby_item_id: &str) -> Result<()> {
        sqlx::query("UPDATE work_items SET emby_item_id = $1, updated_at = now() WHERE id = $2")
            .bind(emby_item_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_destination_path(&self, id: Uuid, destination_path: &str) -> Result<()> {
        sqlx::query(
            "UPDATE work_items SET destination_path = $1, status = $2, updated_at = now() WHERE id = $3",
        )
        .bind(destination_path)
        .bind(Status::Moved.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a row `completed` and stamp the media-server item id it was
    /// synced to, so a `completed` row always carries both `new_path` (via
    /// `destination_path`) and `emby_item_id`.
    pub async fn mark_completed(&self, id: Uuid, emby_item_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET status = $1, emby_item_id = $2, last_error = NULL, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(Status::Completed.as_str())
        .bind(emby_item_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failure: bump `retry_count`, stash the error message,
    /// schedule `next_retry_at`, and move to `error`.
    pub async fn mark_error(
        &self,
        id: Uuid,
        message: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET status = $1, retry_count = retry_count + 1, last_error = $2,
                next_retry_at = $3, updated_at = now()
            WHERE id = $4
            "#,
        )
        .bind(Status::Error.as_str())
        .bind(message)
        .bind(next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `error` rows whose `next_retry_at` has elapsed and whose
    /// `retry_count` has not exceeded `max_retries`.
    pub async fn list_retryable_errors(&self, max_retries: u32) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, file_path, status, movie_code, destination_path, image_url, metadata_json,
                   actress, subtitle, emby_item_id, retry_count,
                   last_error, next_retry_at, created_at, updated_at
            FROM work_items
            WHERE status = $1 AND next_retry_at <= now() AND retry_count <= $2
            ORDER BY next_retry_at ASC
            "#,
        )
        .bind(Status::Error.as_str())
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_item).collect())
    }

    /// `error` rows that have exhausted their retry budget and have not yet
    /// been quarantined (their file still sits at `file_path`, rather than
    /// somewhere under the configured error directory).
    pub async fn list_exhausted_errors(&self, max_retries: u32) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, file_path, status, movie_code, destination_path, image_url, metadata_json,
                   actress, subtitle, emby_item_id, retry_count,
                   last_error, next_retry_at, created_at, updated_at
            FROM work_items
            WHERE status = $1 AND retry_count >= $2 AND destination_path IS NULL
            ORDER BY updated_at ASC
            "#,
        )
        .bind(Status::Error.as_str())
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_item).collect())
    }

    /// Record that an exhausted row's file was relocated to the quarantine
    /// directory. Reuses `destination_path` as the marker that the file has
    /// already been moved, so it is not quarantined twice.
    pub async fn mark_quarantined(&self, id: Uuid, quarantine_path: &str) -> Result<()> {
        sqlx::query("UPDATE work_items SET destination_path = $1, updated_at = now() WHERE id = $2")
            .bind(quarantine_path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reset an `error` row back to `pending` so the file-processor worker
    /// re-attempts it from the top of the pipeline. Clears both
    /// `next_retry_at` and `last_error`, so a retried row that fails again
    /// for a different reason doesn't show the previous attempt's message.
    pub async fn reset_for_retry(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET status = $1, next_retry_at = NULL, last_error = NULL, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(Status::Pending.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM work_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_by_status(&self, status: Status) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) AS c FROM work_items WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("c")?)
    }

    pub async fn list_by_status(&self, status: Status, limit: i64) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, file_path, status, movie_code, destination_path, image_url, metadata_json,
                   actress, subtitle, emby_item_id, retry_count,
                   last_error, next_retry_at, created_at, updated_at
            FROM work_items
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_item).collect())
    }

    /// Delete `completed` rows older than `days`, used by the operator CLI's
    /// `cleanup` subcommand.
    pub async fn cleanup_completed(&self, days: i32) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM work_items WHERE status = $1 AND updated_at < now() - ($2 || ' days')::interval",
        )
        .bind(Status::Completed.as_str())
        .bind(days.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_item(row: &sqlx::postgres::PgRow) -> WorkItem {
    let status: String = row.get("status");
    WorkItem {
        id: row.get("id"),
        file_path: row.get("file_path"),
        status: status.parse().expect("status column holds a known Status value"),
        movie_code: row.get("movie_code"),
        destination_path: row.get("destination_path"),
        image_url: row.get("image_url"),
        metadata_json: row.get("metadata_json"),
        actress: row.get("actress"),
        subtitle: row.get("subtitle"),
        emby_item_id: row.get("emby_item_id"),
        retry_count: row.get::<i32, _>("retry_count") as u32,
        last_error: row.get("last_error"),
        next_retry_at: row.get("next_retry_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
