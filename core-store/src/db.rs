//! Store lifecycle: open, integrity check, corruption recovery, close.

use crate::error::{Result, StoreError};
use crate::photos::PhotoRepository;
use crate::settings::{SettingsRepository, NEEDS_FULL_RESCAN};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ceiling on the startup integrity check.
const INTEGRITY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS photo (
    photo_id            TEXT PRIMARY KEY,
    provider_id         TEXT NOT NULL,
    parent_folder_id    TEXT,
    filename            TEXT NOT NULL,
    created_at          INTEGER,
    width               INTEGER,
    height              INTEGER,
    first_seen_at       INTEGER NOT NULL,
    last_seen_in_scan_at INTEGER NOT NULL,
    tombstoned          INTEGER NOT NULL DEFAULT 0,
    last_viewed_at      INTEGER,
    cached_path         TEXT,
    cached_data         BLOB,
    cached_mime         TEXT,
    cached_size_bytes   INTEGER,
    cached_at           INTEGER
);

CREATE INDEX IF NOT EXISTS idx_photo_display
    ON photo (tombstoned, (cached_size_bytes IS NOT NULL), last_viewed_at);

CREATE INDEX IF NOT EXISTS idx_photo_prefetch
    ON photo (tombstoned, (cached_size_bytes IS NULL), first_seen_at);

CREATE TABLE IF NOT EXISTS setting (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Handle to the metadata store.
///
/// Cloning is cheap; all clones share the underlying pool.
#[derive(Clone)]
pub struct MetadataStore {
    pool: Pool<Sqlite>,
    path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open the store at `path`, running the startup integrity check.
    ///
    /// When the file fails to open as a database or fails the integrity
    /// check, the backing files are deleted and an empty store is
    /// rebuilt with `sync.needsFullRescan=true`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        match Self::try_open(&path).await {
            Ok(store) => Ok(store),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Store unusable, rebuilding empty");
                let store = Self::rebuild(&path).await?;
                store.settings().set(NEEDS_FULL_RESCAN, "true").await?;
                Ok(store)
            }
        }
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        // A single connection: each in-memory connection is its own db.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, path: None })
    }

    async fn try_open(path: &Path) -> Result<Self> {
        let pool = Self::connect(path).await?;
        Self::integrity_check(&pool).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!(path = %path.display(), "Metadata store opened");
        Ok(Self {
            pool,
            path: Some(path.to_path_buf()),
        })
    }

    async fn connect(path: &Path) -> Result<Pool<Sqlite>> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    async fn integrity_check(pool: &Pool<Sqlite>) -> Result<()> {
        debug!("Running integrity check");
        let verdict: String = tokio::time::timeout(
            INTEGRITY_CHECK_TIMEOUT,
            sqlx::query_scalar("PRAGMA integrity_check").fetch_one(pool),
        )
        .await
        .map_err(|_| StoreError::Integrity("integrity check timed out".to_string()))??;

        if verdict != "ok" {
            return Err(StoreError::Integrity(verdict));
        }
        debug!("Integrity check passed");
        Ok(())
    }

    /// Delete the backing files and re-open empty.
    async fn rebuild(path: &Path) -> Result<Self> {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_os_string();
            file.push(suffix);
            match std::fs::remove_file(PathBuf::from(&file)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::RebuildFailed(e.to_string())),
            }
        }

        let store = Self::try_open(path)
            .await
            .map_err(|e| StoreError::RebuildFailed(e.to_string()))?;
        info!(path = %path.display(), "Store rebuilt empty, full rescan required");
        Ok(store)
    }

    pub fn photos(&self) -> PhotoRepository {
        PhotoRepository::new(self.pool.clone())
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush and close the pool.
    pub async fn close(&self) {
        info!("Closing metadata store");
        self.pool.close().await;
    }
}
