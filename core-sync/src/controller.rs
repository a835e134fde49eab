//! Full and incremental scan orchestration.

use crate::error::{Result, SyncError};
use chrono::Utc;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_store::{cursor_key, MetadataStore, PhotoRepository, SettingsRepository};
use core_store::{LAST_FULL_SCAN_AT, NEEDS_FULL_RESCAN};
use frame_traits::{ChangeEvent, CloudProvider, FolderSpec, PhotoRecord, UNBOUNDED_DEPTH};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Ceiling on the ancestor walk when filtering incremental changes.
const ANCESTOR_WALK_LIMIT: usize = 20;

/// What a scan did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub full: bool,
    pub found: usize,
    pub tombstoned: u64,
}

/// Periodic reconciliation of provider state into the store.
pub struct SyncController {
    provider: Arc<dyn CloudProvider>,
    photos: PhotoRepository,
    settings: SettingsRepository,
    events: EventBus,
    folders: Vec<FolderSpec>,
}

impl SyncController {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: &MetadataStore,
        events: EventBus,
        folders: Vec<FolderSpec>,
    ) -> Self {
        Self {
            provider,
            photos: store.photos(),
            settings: store.settings(),
            events,
            folders,
        }
    }

    /// One sync tick: full scan when the store demands it or no cursor
    /// exists, incremental otherwise.
    #[instrument(skip(self, cancel))]
    pub async fn run_scan(&self, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let provider_name = self.provider.provider_name();
        let needs_full = self
            .settings
            .get(NEEDS_FULL_RESCAN)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);
        let cursor = self.settings.get(&cursor_key(provider_name)).await?;

        let outcome = if needs_full || cursor.is_none() {
            let outcome = self.full_scan(cancel).await?;
            // Cursor acquired after the scan; changes racing the scan
            // surface on the next incremental pass at worst.
            let cursor = self.provider.initial_cursor().await?;
            self.settings.set(&cursor_key(provider_name), &cursor).await?;
            self.settings.delete(NEEDS_FULL_RESCAN).await?;
            outcome
        } else {
            // Checked above: the else branch always has a cursor.
            let cursor = cursor.unwrap_or_default();
            self.incremental_scan(&cursor, cancel).await?
        };

        let _ = self.events.emit(CoreEvent::Sync(SyncEvent::Completed {
            found: outcome.found,
            tombstoned: outcome.tombstoned,
        }));
        Ok(outcome)
    }

    /// Recursively list every configured folder, upsert the union, then
    /// tombstone rows the scan did not revisit.
    #[instrument(skip(self, cancel))]
    pub async fn full_scan(&self, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let provider_name = self.provider.provider_name();
        let scan_start_ms = Utc::now().timestamp_millis();
        let _ = self
            .events
            .emit(CoreEvent::Sync(SyncEvent::Started { full: true }));
        info!(folders = self.folders.len(), "Full scan started");

        let specs = if self.folders.is_empty() {
            vec![FolderSpec::root()]
        } else {
            self.folders.clone()
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut found = 0usize;

        for spec in &specs {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let records = self
                .provider
                .scan_folder(spec.folder_id.as_deref(), spec.depth)
                .await?;

            // Union across folder specs by photo id: the first
            // occurrence wins, later ones merge silently.
            let fresh: Vec<PhotoRecord> = records
                .into_iter()
                .filter(|r| seen.insert(r.id.clone()))
                .collect();
            found += fresh.len();

            self.photos
                .batch_upsert(&fresh, provider_name, Utc::now().timestamp_millis())
                .await?;
            debug!(
                folder = spec.folder_id.as_deref().unwrap_or("<root>"),
                records = fresh.len(),
                "Folder spec scanned"
            );
        }

        let tombstoned = self
            .photos
            .tombstone_unseen(provider_name, scan_start_ms)
            .await?;

        self.settings
            .set(LAST_FULL_SCAN_AT, &Utc::now().timestamp_millis().to_string())
            .await?;

        info!(found, tombstoned, "Full scan complete");
        Ok(ScanOutcome {
            full: true,
            found,
            tombstoned,
        })
    }

    /// Apply the change feed, then persist the cursor that supersedes
    /// it. A failure anywhere leaves the old cursor in place so the
    /// page replays next tick.
    #[instrument(skip(self, cursor, cancel))]
    pub async fn incremental_scan(
        &self,
        cursor: &str,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome> {
        let provider_name = self.provider.provider_name();
        let _ = self
            .events
            .emit(CoreEvent::Sync(SyncEvent::Started { full: false }));
        debug!("Incremental scan started");

        let page = self.provider.changes_since(cursor).await?;

        let mut found = 0usize;
        let mut tombstoned = 0u64;

        for change in page.changes {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match change {
                ChangeEvent::Created(record) | ChangeEvent::Updated(record) => {
                    if self.record_in_scope(&record).await? {
                        self.photos
                            .upsert_scanned(&record, provider_name, Utc::now().timestamp_millis())
                            .await?;
                        found += 1;
                    } else {
                        debug!(photo_id = %record.id, "Change outside configured folders, skipped");
                    }
                }
                ChangeEvent::Deleted(photo_id) => {
                    if self.photos.mark_tombstoned(&photo_id).await? {
                        tombstoned += 1;
                    }
                }
            }
        }

        // The page applied cleanly; only now does the cursor advance.
        self.settings
            .set(&cursor_key(provider_name), &page.next_cursor)
            .await?;

        info!(found, tombstoned, "Incremental scan complete");
        Ok(ScanOutcome {
            full: false,
            found,
            tombstoned,
        })
    }

    /// Is the record under one of the configured folder specs?
    ///
    /// Walks the parent chain upward, bounded to [`ANCESTOR_WALK_LIMIT`]
    /// levels and guarded against folder cycles.
    async fn record_in_scope(&self, record: &PhotoRecord) -> Result<bool> {
        if self.folders.is_empty() {
            return Ok(true);
        }
        if self
            .folders
            .iter()
            .any(|s| s.folder_id.is_none() && s.depth == UNBOUNDED_DEPTH)
        {
            return Ok(true);
        }

        // ancestors[0] is the folder containing the photo.
        let mut ancestors: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut reached_root = record.parent_folder_id.is_none();
        let mut current = record.parent_folder_id.clone();

        while let Some(folder) = current {
            if !visited.insert(folder.clone()) {
                warn!(folder_id = %folder, "Folder cycle during ancestor walk");
                break;
            }
            ancestors.push(folder.clone());
            if ancestors.len() >= ANCESTOR_WALK_LIMIT {
                break;
            }
            current = self.provider.folder_parent(&folder).await?;
            if current.is_none() {
                reached_root = true;
            }
        }

        for spec in &self.folders {
            match &spec.folder_id {
                Some(id) => {
                    if let Some(levels_below) = ancestors.iter().position(|a| a == id) {
                        if spec.depth == UNBOUNDED_DEPTH || levels_below as i32 <= spec.depth {
                            return Ok(true);
                        }
                    }
                }
                None => {
                    if spec.depth == UNBOUNDED_DEPTH {
                        return Ok(true);
                    }
                    // Each ancestor is one level of descent below the
                    // root, mirroring `levels_below` above.
                    if reached_root && ancestors.len() as i32 <= spec.depth {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use frame_traits::{ChangePage, FrameError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct StubProvider {
        /// folder id ("<root>" for None) -> records returned by scan
        scans: Mutex<HashMap<String, Vec<PhotoRecord>>>,
        /// child folder -> parent folder
        parents: Mutex<HashMap<String, Option<String>>>,
        changes: Mutex<Option<frame_traits::Result<ChangePage>>>,
        scan_calls: AtomicU32,
    }

    impl StubProvider {
        fn with_scan(self, folder: Option<&str>, records: Vec<PhotoRecord>) -> Self {
            self.scans
                .lock()
                .unwrap()
                .insert(folder.unwrap_or("<root>").to_string(), records);
            self
        }

        fn with_parent(self, child: &str, parent: Option<&str>) -> Self {
            self.parents
                .lock()
                .unwrap()
                .insert(child.to_string(), parent.map(str::to_string));
            self
        }

        fn with_changes(self, page: frame_traits::Result<ChangePage>) -> Self {
            *self.changes.lock().unwrap() = Some(page);
            self
        }
    }

    #[async_trait]
    impl CloudProvider for StubProvider {
        async fn initialize(&self) -> frame_traits::Result<()> {
            Ok(())
        }

        async fn is_reachable(&self) -> bool {
            true
        }

        async fn scan_folder(
            &self,
            folder_id: Option<&str>,
            _max_depth: i32,
        ) -> frame_traits::Result<Vec<PhotoRecord>> {
            self.scan_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .scans
                .lock()
                .unwrap()
                .get(folder_id.unwrap_or("<root>"))
                .cloned()
                .unwrap_or_default())
        }

        async fn download_content(
            &self,
            _photo_id: &str,
            _timeout: Duration,
            _max_bytes: u64,
        ) -> frame_traits::Result<Bytes> {
            Ok(Bytes::new())
        }

        async fn changes_since(&self, _cursor: &str) -> frame_traits::Result<ChangePage> {
            match self.changes.lock().unwrap().take() {
                Some(result) => result,
                None => Ok(ChangePage {
                    changes: vec![],
                    next_cursor: "drained".to_string(),
                }),
            }
        }

        async fn initial_cursor(&self) -> frame_traits::Result<String> {
            Ok("cursor-0".to_string())
        }

        async fn folder_parent(&self, folder_id: &str) -> frame_traits::Result<Option<String>> {
            Ok(self
                .parents
                .lock()
                .unwrap()
                .get(folder_id)
                .cloned()
                .flatten())
        }

        fn provider_name(&self) -> &'static str {
            "stub"
        }
    }

    fn record(id: &str, parent: Option<&str>) -> PhotoRecord {
        PhotoRecord {
            id: id.to_string(),
            filename: format!("{}.jpg", id),
            parent_folder_id: parent.map(str::to_string),
            created_at: None,
            width: None,
            height: None,
        }
    }

    fn controller(
        provider: StubProvider,
        store: &MetadataStore,
        folders: Vec<FolderSpec>,
    ) -> SyncController {
        SyncController::new(Arc::new(provider), store, EventBus::new(32), folders)
    }

    #[tokio::test]
    async fn first_run_does_full_scan_and_acquires_cursor() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let provider = StubProvider::default()
            .with_scan(None, vec![record("a", None), record("b", None)]);
        let sync = controller(provider, &store, vec![]);

        let outcome = sync.run_scan(&CancellationToken::new()).await.unwrap();
        assert!(outcome.full);
        assert_eq!(outcome.found, 2);

        assert!(store.photos().find_by_id("a").await.unwrap().is_some());
        assert_eq!(
            store.settings().get(&cursor_key("stub")).await.unwrap().as_deref(),
            Some("cursor-0")
        );
    }

    #[tokio::test]
    async fn rescan_flag_forces_full_scan_despite_cursor() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.settings().set(&cursor_key("stub"), "old-cursor").await.unwrap();
        store.settings().set(NEEDS_FULL_RESCAN, "true").await.unwrap();

        let provider = StubProvider::default().with_scan(None, vec![record("a", None)]);
        let sync = controller(provider, &store, vec![]);

        let outcome = sync.run_scan(&CancellationToken::new()).await.unwrap();
        assert!(outcome.full);
        assert_eq!(
            store.settings().get(NEEDS_FULL_RESCAN).await.unwrap(),
            None
        );
        assert_eq!(
            store.settings().get(&cursor_key("stub")).await.unwrap().as_deref(),
            Some("cursor-0")
        );
    }

    #[tokio::test]
    async fn full_scan_tombstones_rows_not_revisited() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store
            .photos()
            .upsert_scanned(&record("stale", None), "stub", 1)
            .await
            .unwrap();

        let provider = StubProvider::default().with_scan(None, vec![record("fresh", None)]);
        let sync = controller(provider, &store, vec![]);

        let outcome = sync.full_scan(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.tombstoned, 1);
        assert!(store.photos().find_by_id("stale").await.unwrap().unwrap().tombstoned);
        assert!(!store.photos().find_by_id("fresh").await.unwrap().unwrap().tombstoned);
    }

    #[tokio::test]
    async fn union_across_folder_specs_dedups_by_id() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let provider = StubProvider::default()
            .with_scan(Some("f1"), vec![record("shared", Some("f1")), record("only1", Some("f1"))])
            .with_scan(Some("f2"), vec![record("shared", Some("f2")), record("only2", Some("f2"))]);

        let folders = vec![
            FolderSpec {
                folder_id: Some("f1".to_string()),
                depth: UNBOUNDED_DEPTH,
            },
            FolderSpec {
                folder_id: Some("f2".to_string()),
                depth: UNBOUNDED_DEPTH,
            },
        ];
        let sync = controller(provider, &store, folders);

        let outcome = sync.full_scan(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.found, 3);

        // First occurrence won: the row carries f1's parent.
        let row = store.photos().find_by_id("shared").await.unwrap().unwrap();
        assert_eq!(row.parent_folder_id.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn incremental_applies_changes_and_advances_cursor() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.settings().set(&cursor_key("stub"), "cursor-1").await.unwrap();
        store
            .photos()
            .upsert_scanned(&record("b", None), "stub", 1)
            .await
            .unwrap();

        let provider = StubProvider::default().with_changes(Ok(ChangePage {
            changes: vec![
                ChangeEvent::Created(record("new", None)),
                ChangeEvent::Deleted("b".to_string()),
            ],
            next_cursor: "cursor-2".to_string(),
        }));
        let sync = controller(provider, &store, vec![]);

        let outcome = sync.run_scan(&CancellationToken::new()).await.unwrap();
        assert!(!outcome.full);
        assert_eq!(outcome.found, 1);
        assert_eq!(outcome.tombstoned, 1);

        assert!(store.photos().find_by_id("new").await.unwrap().is_some());
        assert!(store.photos().find_by_id("b").await.unwrap().unwrap().tombstoned);
        assert_eq!(
            store.settings().get(&cursor_key("stub")).await.unwrap().as_deref(),
            Some("cursor-2")
        );
    }

    #[tokio::test]
    async fn failed_change_fetch_leaves_cursor_untouched() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.settings().set(&cursor_key("stub"), "cursor-1").await.unwrap();

        let provider = StubProvider::default()
            .with_changes(Err(FrameError::Network("mid-scan kill".to_string())));
        let sync = controller(provider, &store, vec![]);

        let err = sync.run_scan(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Provider(_)));
        assert_eq!(
            store.settings().get(&cursor_key("stub")).await.unwrap().as_deref(),
            Some("cursor-1")
        );
    }

    #[tokio::test]
    async fn ancestor_filter_honors_depth() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.settings().set(&cursor_key("stub"), "cursor-1").await.unwrap();

        // album/sub/photo-in-range, album/sub2/deep/photo-too-deep
        let provider = StubProvider::default()
            .with_parent("sub", Some("album"))
            .with_parent("sub2", Some("album"))
            .with_parent("deep", Some("sub2"))
            .with_changes(Ok(ChangePage {
                changes: vec![
                    ChangeEvent::Updated(record("in-range", Some("sub"))),
                    ChangeEvent::Updated(record("too-deep", Some("deep"))),
                ],
                next_cursor: "cursor-2".to_string(),
            }));

        let folders = vec![FolderSpec {
            folder_id: Some("album".to_string()),
            depth: 1,
        }];
        let sync = controller(provider, &store, folders);

        let outcome = sync.run_scan(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.found, 1);
        assert!(store.photos().find_by_id("in-range").await.unwrap().is_some());
        assert!(store.photos().find_by_id("too-deep").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn root_spec_with_finite_depth_bounds_descent() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.settings().set(&cursor_key("stub"), "cursor-1").await.unwrap();

        // at-root sits in the root itself; one-down is in top-level
        // folder "top"; two-down is in top/sub.
        let provider = StubProvider::default()
            .with_parent("sub", Some("top"))
            .with_changes(Ok(ChangePage {
                changes: vec![
                    ChangeEvent::Updated(record("at-root", None)),
                    ChangeEvent::Updated(record("one-down", Some("top"))),
                    ChangeEvent::Updated(record("two-down", Some("sub"))),
                ],
                next_cursor: "cursor-2".to_string(),
            }));

        let folders = vec![FolderSpec {
            folder_id: None,
            depth: 1,
        }];
        let sync = controller(provider, &store, folders);

        let outcome = sync.run_scan(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.found, 2);
        assert!(store.photos().find_by_id("at-root").await.unwrap().is_some());
        assert!(store.photos().find_by_id("one-down").await.unwrap().is_some());
        // Descend one level, no further.
        assert!(store.photos().find_by_id("two-down").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ancestor_walk_survives_folder_cycles() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        store.settings().set(&cursor_key("stub"), "cursor-1").await.unwrap();

        let provider = StubProvider::default()
            .with_parent("a", Some("b"))
            .with_parent("b", Some("a"))
            .with_changes(Ok(ChangePage {
                changes: vec![ChangeEvent::Updated(record("cyclic", Some("a")))],
                next_cursor: "cursor-2".to_string(),
            }));

        let folders = vec![FolderSpec {
            folder_id: Some("elsewhere".to_string()),
            depth: UNBOUNDED_DEPTH,
        }];
        let sync = controller(provider, &store, folders);

        // Terminates, and the cyclic record is out of scope.
        let outcome = sync.run_scan(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.found, 0);
        assert!(store.photos().find_by_id("cyclic").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_scan_stops_between_folders() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let provider = StubProvider::default().with_scan(None, vec![record("a", None)]);
        let sync = controller(provider, &store, vec![]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sync.full_scan(&cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
