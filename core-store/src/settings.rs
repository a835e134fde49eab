//! Key/value settings: cross-restart state such as sync cursors.

use crate::error::Result;
use sqlx::{Pool, Sqlite};

/// Set when the store was rebuilt after corruption; the next sync tick
/// must run a full scan.
pub const NEEDS_FULL_RESCAN: &str = "sync.needsFullRescan";

/// Completion time of the last full scan, epoch milliseconds.
pub const LAST_FULL_SCAN_AT: &str = "sync.lastFullScanAt";

/// Settings key holding the sync cursor for a provider.
pub fn cursor_key(provider_name: &str) -> String {
    format!("sync.cursor.{}", provider_name)
}

/// Repository over the `setting` table.
#[derive(Clone)]
pub struct SettingsRepository {
    pool: Pool<Sqlite>,
}

impl SettingsRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM setting WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO setting (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM setting WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
