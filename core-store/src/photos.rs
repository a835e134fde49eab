//! Photo repository: every query shape the engines need.
//!
//! Candidate selection queries lean on the partial-expression indexes
//! created at open; the display query stays on the index so it returns
//! well under its 10 ms budget at tens of thousands of rows.

use crate::error::Result;
use crate::models::Photo;
use frame_traits::PhotoRecord;
use sqlx::{Pool, Sqlite};
use tracing::debug;

const PHOTO_COLUMNS: &str = "photo_id, provider_id, parent_folder_id, filename, created_at, \
     width, height, first_seen_at, last_seen_in_scan_at, tombstoned, last_viewed_at, \
     cached_path, cached_data, cached_mime, cached_size_bytes, cached_at";

/// Repository over the `photo` table.
#[derive(Clone)]
pub struct PhotoRepository {
    pool: Pool<Sqlite>,
}

impl PhotoRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, photo_id: &str) -> Result<Option<Photo>> {
        let row = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {} FROM photo WHERE photo_id = ?",
            PHOTO_COLUMNS
        ))
        .bind(photo_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert or refresh a scanned record.
    ///
    /// A revisit refreshes metadata and `last_seen_in_scan_at`; it does
    /// NOT clear a tombstone, so deleted photos stay suppressed when a
    /// later scan re-reports them.
    pub async fn upsert_scanned(
        &self,
        record: &PhotoRecord,
        provider_id: &str,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO photo (photo_id, provider_id, parent_folder_id, filename,
                               created_at, width, height, first_seen_at, last_seen_in_scan_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(photo_id) DO UPDATE SET
                parent_folder_id = excluded.parent_folder_id,
                filename = excluded.filename,
                created_at = excluded.created_at,
                width = excluded.width,
                height = excluded.height,
                last_seen_in_scan_at = excluded.last_seen_in_scan_at
            "#,
        )
        .bind(&record.id)
        .bind(provider_id)
        .bind(&record.parent_folder_id)
        .bind(&record.filename)
        .bind(record.created_at)
        .bind(record.width.map(|w| w as i64))
        .bind(record.height.map(|h| h as i64))
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert one scan page inside a single transaction.
    pub async fn batch_upsert(
        &self,
        records: &[PhotoRecord],
        provider_id: &str,
        now_ms: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO photo (photo_id, provider_id, parent_folder_id, filename,
                                   created_at, width, height, first_seen_at, last_seen_in_scan_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(photo_id) DO UPDATE SET
                    parent_folder_id = excluded.parent_folder_id,
                    filename = excluded.filename,
                    created_at = excluded.created_at,
                    width = excluded.width,
                    height = excluded.height,
                    last_seen_in_scan_at = excluded.last_seen_in_scan_at
                "#,
            )
            .bind(&record.id)
            .bind(provider_id)
            .bind(&record.parent_folder_id)
            .bind(&record.filename)
            .bind(record.created_at)
            .bind(record.width.map(|w| w as i64))
            .bind(record.height.map(|h| h as i64))
            .bind(now_ms)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = records.len(), "Batch upsert committed");
        Ok(())
    }

    pub async fn mark_tombstoned(&self, photo_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE photo SET tombstoned = 1 WHERE photo_id = ?")
            .bind(photo_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Tombstone every row of the provider not revisited since
    /// `scan_start_ms`. Runs after a completed full scan.
    pub async fn tombstone_unseen(&self, provider_id: &str, scan_start_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE photo SET tombstoned = 1
             WHERE provider_id = ? AND tombstoned = 0 AND last_seen_in_scan_at < ?",
        )
        .bind(provider_id)
        .bind(scan_start_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Next photo to display: cached, not tombstoned, least recently
    /// shown, never-shown first, ties broken randomly.
    pub async fn next_display_candidate(&self) -> Result<Option<Photo>> {
        let row = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {} FROM photo
             WHERE tombstoned = 0 AND cached_size_bytes IS NOT NULL
             ORDER BY last_viewed_at ASC NULLS FIRST, RANDOM()
             LIMIT 1",
            PHOTO_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Oldest-first uncached rows, the prefetch work list.
    pub async fn prefetch_candidates(&self, limit: i64) -> Result<Vec<Photo>> {
        let rows = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {} FROM photo
             WHERE tombstoned = 0 AND cached_size_bytes IS NULL
             ORDER BY first_seen_at ASC
             LIMIT ?",
            PHOTO_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Least-recently-shown cached rows, the eviction order.
    pub async fn eviction_candidates(&self, limit: i64) -> Result<Vec<Photo>> {
        let rows = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {} FROM photo
             WHERE cached_size_bytes IS NOT NULL
             ORDER BY last_viewed_at ASC NULLS FIRST
             LIMIT ?",
            PHOTO_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Tombstoned rows still holding a cache resource; released on the
    /// next eviction pass regardless of the byte cap.
    pub async fn tombstoned_with_cache(&self, limit: i64) -> Result<Vec<Photo>> {
        let rows = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {} FROM photo
             WHERE tombstoned = 1 AND cached_size_bytes IS NOT NULL
             LIMIT ?",
            PHOTO_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn total_cached_bytes(&self) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(cached_size_bytes), 0) FROM photo")
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    /// Record a file-mode cache write.
    pub async fn set_cached_file(
        &self,
        photo_id: &str,
        path: &str,
        size_bytes: i64,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE photo SET cached_path = ?, cached_data = NULL, cached_mime = NULL,
                              cached_size_bytes = ?, cached_at = ?
             WHERE photo_id = ?",
        )
        .bind(path)
        .bind(size_bytes)
        .bind(now_ms)
        .bind(photo_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a blob-mode cache write.
    pub async fn set_cached_blob(
        &self,
        photo_id: &str,
        data: &[u8],
        mime: &str,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE photo SET cached_data = ?, cached_mime = ?, cached_path = NULL,
                              cached_size_bytes = ?, cached_at = ?
             WHERE photo_id = ?",
        )
        .bind(data)
        .bind(mime)
        .bind(data.len() as i64)
        .bind(now_ms)
        .bind(photo_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Null out all cache columns atomically.
    pub async fn clear_cache_fields(&self, photo_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE photo SET cached_path = NULL, cached_data = NULL, cached_mime = NULL,
                              cached_size_bytes = NULL, cached_at = NULL
             WHERE photo_id = ?",
        )
        .bind(photo_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_viewed(&self, photo_id: &str, now_ms: i64) -> Result<()> {
        sqlx::query("UPDATE photo SET last_viewed_at = ? WHERE photo_id = ?")
            .bind(now_ms)
            .bind(photo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reshuffle: zero every `last_viewed_at` so the next cycle starts
    /// from a clean slate.
    pub async fn reset_all_viewed(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE photo SET last_viewed_at = NULL")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count display candidates not shown since `cutoff_ms` (or never
    /// shown). Zero while candidates exist means the cycle is spent.
    pub async fn count_unshown_since(&self, cutoff_ms: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM photo
             WHERE tombstoned = 0 AND cached_size_bytes IS NOT NULL
               AND (last_viewed_at IS NULL OR last_viewed_at < ?)",
        )
        .bind(cutoff_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count_display_candidates(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM photo WHERE tombstoned = 0 AND cached_size_bytes IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// All rows holding a file-mode resource, for startup reconciliation.
    pub async fn rows_with_cached_path(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT photo_id, cached_path FROM photo WHERE cached_path IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
