//! Cloud Provider Contract
//!
//! A provider is a stateless polymorphic client over a cloud folder store.
//! Two conformances exist (`provider-google-drive`, `provider-onedrive`);
//! both expose listing, content download, and incremental change
//! detection behind this trait.
//!
//! Required behaviors every conformance carries internally:
//! - recursive scans track visited folder ids and skip re-entry
//! - transient failures (transport, 5xx, rate limits) retry up to 3 times
//!   with exponential backoff from 2 s, capped at 60 s; auth failures,
//!   not-found, and permission errors fail fast
//! - successive list pages are separated by a 500 ms pacing delay

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Depth value meaning "descend without bound".
pub const UNBOUNDED_DEPTH: i32 = -1;

/// A folder to scan and how deep to descend into it.
///
/// `folder_id: None` addresses the drive root. `depth` of 0 lists the
/// folder itself without descending; N > 0 descends N levels;
/// [`UNBOUNDED_DEPTH`] removes the bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSpec {
    #[serde(rename = "id", default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_depth")]
    pub depth: i32,
}

fn default_depth() -> i32 {
    UNBOUNDED_DEPTH
}

impl FolderSpec {
    pub fn root() -> Self {
        Self {
            folder_id: None,
            depth: UNBOUNDED_DEPTH,
        }
    }
}

/// A photo as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: String,
    pub filename: String,
    pub parent_folder_id: Option<String>,
    /// Capture or upload time, epoch milliseconds.
    pub created_at: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One entry of an incremental change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PhotoRecord),
    Updated(PhotoRecord),
    Deleted(String),
}

/// One drained page of the change feed plus the cursor that supersedes it.
///
/// The next cursor must only be persisted after every change in the page
/// has been applied.
#[derive(Debug, Clone)]
pub struct ChangePage {
    pub changes: Vec<ChangeEvent>,
    pub next_cursor: String,
}

/// Capability contract over a cloud folder store.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Verify credentials and prime the token cache.
    ///
    /// Fails with `FrameError::Authentication` when credentials are
    /// missing or invalid.
    async fn initialize(&self) -> Result<()>;

    /// Probe the provider's canonical host via DNS. Never fails.
    async fn is_reachable(&self) -> bool;

    /// Recursively list photos under `folder_id` (drive root when `None`)
    /// down to `max_depth`.
    async fn scan_folder(&self, folder_id: Option<&str>, max_depth: i32)
        -> Result<Vec<PhotoRecord>>;

    /// Download the photo's content, bounded by `timeout` and `max_bytes`.
    ///
    /// Exceeding `max_bytes` aborts the download with
    /// `FrameError::Validation`; the partial body is discarded.
    async fn download_content(
        &self,
        photo_id: &str,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<Bytes>;

    /// Fetch changes recorded after `cursor`.
    async fn changes_since(&self, cursor: &str) -> Result<ChangePage>;

    /// Cursor that encodes "everything up to now has been seen".
    async fn initial_cursor(&self) -> Result<String>;

    /// Parent folder of `folder_id`, `None` at the drive root.
    ///
    /// Used by the incremental sync filter to walk ancestor chains.
    async fn folder_parent(&self, folder_id: &str) -> Result<Option<String>>;

    fn provider_name(&self) -> &'static str;
}
