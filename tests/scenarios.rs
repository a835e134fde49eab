//! End-to-end scenarios over the store, cache engine, sync controller,
//! and display scheduler with a scripted provider. No network, no
//! timers: ticks are driven explicitly.

use async_trait::async_trait;
use bytes::Bytes;
use core_cache::{CacheEngine, CacheEngineConfig};
use core_display::DisplayScheduler;
use core_runtime::events::EventBus;
use core_store::MetadataStore;
use core_sync::SyncController;
use frame_traits::{ChangeEvent, ChangePage, CloudProvider, FrameError, PhotoRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct ScriptedProvider {
    photos: Mutex<Vec<PhotoRecord>>,
    content: Mutex<HashMap<String, Vec<u8>>>,
    pending_changes: Mutex<Vec<ChangeEvent>>,
    fail_downloads: AtomicBool,
}

impl ScriptedProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            photos: Mutex::new(Vec::new()),
            content: Mutex::new(HashMap::new()),
            pending_changes: Mutex::new(Vec::new()),
            fail_downloads: AtomicBool::new(false),
        })
    }

    fn add_photo(&self, id: &str, bytes: Vec<u8>) {
        let record = PhotoRecord {
            id: id.to_string(),
            filename: format!("{}.jpg", id),
            parent_folder_id: None,
            created_at: Some(1_700_000_000_000),
            width: Some(1920),
            height: Some(1080),
        };
        self.photos.lock().unwrap().push(record.clone());
        self.content.lock().unwrap().insert(id.to_string(), bytes);
        self.pending_changes
            .lock()
            .unwrap()
            .push(ChangeEvent::Created(record));
    }

    fn delete_photo(&self, id: &str) {
        self.photos.lock().unwrap().retain(|p| p.id != id);
        self.content.lock().unwrap().remove(id);
        self.pending_changes
            .lock()
            .unwrap()
            .push(ChangeEvent::Deleted(id.to_string()));
    }
}

#[async_trait]
impl CloudProvider for ScriptedProvider {
    async fn initialize(&self) -> frame_traits::Result<()> {
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        true
    }

    async fn scan_folder(
        &self,
        _folder_id: Option<&str>,
        _max_depth: i32,
    ) -> frame_traits::Result<Vec<PhotoRecord>> {
        Ok(self.photos.lock().unwrap().clone())
    }

    async fn download_content(
        &self,
        photo_id: &str,
        _timeout: Duration,
        _max_bytes: u64,
    ) -> frame_traits::Result<Bytes> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(FrameError::Network("scripted outage".to_string()));
        }
        self.content
            .lock()
            .unwrap()
            .get(photo_id)
            .map(|b| Bytes::from(b.clone()))
            .ok_or_else(|| FrameError::NotFound(photo_id.to_string()))
    }

    async fn changes_since(&self, _cursor: &str) -> frame_traits::Result<ChangePage> {
        Ok(ChangePage {
            changes: std::mem::take(&mut *self.pending_changes.lock().unwrap()),
            next_cursor: "advanced".to_string(),
        })
    }

    async fn initial_cursor(&self) -> frame_traits::Result<String> {
        Ok("initial".to_string())
    }

    async fn folder_parent(&self, _folder_id: &str) -> frame_traits::Result<Option<String>> {
        Ok(None)
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

struct Fixture {
    store: MetadataStore,
    provider: Arc<ScriptedProvider>,
    sync: SyncController,
    engine: Arc<CacheEngine>,
    display: DisplayScheduler,
}

async fn fixture(max_cache_bytes: u64) -> Fixture {
    let store = MetadataStore::open_in_memory().await.unwrap();
    let provider = ScriptedProvider::new();
    let events = EventBus::new(256);

    let sync = SyncController::new(provider.clone(), &store, events.clone(), vec![]);
    let engine = Arc::new(
        CacheEngine::new(
            CacheEngineConfig {
                max_cache_bytes,
                use_blob_storage: true,
                normalize_images: false,
                ..CacheEngineConfig::default()
            },
            &store,
            provider.clone(),
            events.clone(),
        )
        .await
        .unwrap(),
    );
    let display = DisplayScheduler::new(&store, events, Duration::from_secs(60));

    Fixture {
        store,
        provider,
        sync,
        engine,
        display,
    }
}

fn payload(kib: usize) -> Vec<u8> {
    vec![0xA5; kib * 1024]
}

// Cold start: three photos sync, cache, then display without repeats.
#[tokio::test]
async fn cold_start_syncs_caches_and_displays_each_photo_once() {
    let fx = fixture(u64::MAX).await;
    for id in ["a", "b", "c"] {
        fx.provider.add_photo(id, payload(2));
    }

    fx.sync.run_scan(&CancellationToken::new()).await.unwrap();
    fx.engine.tick().await.unwrap();

    for id in ["a", "b", "c"] {
        let row = fx.store.photos().find_by_id(id).await.unwrap().unwrap();
        assert!(row.cached_size_bytes.unwrap_or(0) > 0, "{} not cached", id);
    }

    let mut seen = HashSet::new();
    for _ in 0..3 {
        let frame = fx.display.tick().await.unwrap().unwrap();
        assert!(["a", "b", "c"].contains(&frame.photo_id.as_str()));
        assert!(seen.insert(frame.photo_id), "repeat within a cycle");
    }
    assert_eq!(seen.len(), 3);
}

// Cap exceeded: ten ~200 KiB photos against a 1 MiB ceiling. Eviction
// runs at tick start, so the third tick drains the overshoot and ends
// with one fresh batch at most.
#[tokio::test]
async fn byte_cap_holds_after_three_ticks() {
    let fx = fixture(1024 * 1024).await;
    for i in 0..10 {
        fx.provider.add_photo(&format!("p{}", i), payload(200));
    }

    fx.sync.run_scan(&CancellationToken::new()).await.unwrap();
    for _ in 0..3 {
        fx.engine.tick().await.unwrap();
    }

    let total = fx.store.photos().total_cached_bytes().await.unwrap() as u64;
    assert!(total <= 1024 * 1024, "cap exceeded: {}", total);

    let cached = fx.store.photos().count_display_candidates().await.unwrap();
    assert!(cached <= 5, "too many rows cached: {}", cached);
}

// Deletion: after the incremental scan reports it, the photo never
// displays again and its bytes are freed on the next tick.
#[tokio::test]
async fn deleted_photo_stops_displaying_and_frees_bytes() {
    let fx = fixture(u64::MAX).await;
    for id in ["keep", "drop"] {
        fx.provider.add_photo(id, payload(4));
    }

    fx.sync.run_scan(&CancellationToken::new()).await.unwrap();
    fx.engine.tick().await.unwrap();
    let before = fx.store.photos().total_cached_bytes().await.unwrap();

    fx.provider.delete_photo("drop");
    fx.sync.run_scan(&CancellationToken::new()).await.unwrap();

    for _ in 0..4 {
        if let Some(frame) = fx.display.tick().await.unwrap() {
            assert_ne!(frame.photo_id, "drop");
        }
    }

    fx.engine.tick().await.unwrap();
    let after = fx.store.photos().total_cached_bytes().await.unwrap();
    assert!(after < before, "no bytes freed: {} -> {}", before, after);

    let row = fx.store.photos().find_by_id("drop").await.unwrap().unwrap();
    assert!(row.tombstoned);
    assert!(row.cached_size_bytes.is_none());
}

// Offline resilience: downloads fail but frames keep flowing from
// whatever is already cached.
#[tokio::test]
async fn display_survives_provider_outage() {
    let fx = fixture(u64::MAX).await;
    fx.provider.add_photo("cached", payload(4));
    fx.sync.run_scan(&CancellationToken::new()).await.unwrap();
    fx.engine.tick().await.unwrap();

    fx.provider.add_photo("never-arrives", payload(4));
    fx.sync.run_scan(&CancellationToken::new()).await.unwrap();
    fx.provider.fail_downloads.store(true, Ordering::SeqCst);

    for _ in 0..3 {
        fx.engine.tick().await.unwrap();
        let frame = fx.display.tick().await.unwrap().unwrap();
        assert_eq!(frame.photo_id, "cached");
    }
    assert_eq!(fx.engine.consecutive_failed_ticks(), 3);
}

// Corruption recovery: a tampered store file rebuilds empty, flags the
// rescan, and the next scan repopulates.
#[tokio::test]
async fn corrupted_store_recovers_and_repopulates() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("frame.db");

    {
        let store = MetadataStore::open(&db_path).await.unwrap();
        store
            .photos()
            .upsert_scanned(
                &PhotoRecord {
                    id: "old".to_string(),
                    filename: "old.jpg".to_string(),
                    parent_folder_id: None,
                    created_at: None,
                    width: None,
                    height: None,
                },
                "scripted",
                1,
            )
            .await
            .unwrap();
        store.settings().set("sync.cursor.scripted", "stale").await.unwrap();
        store.close().await;
    }

    // Tamper.
    std::fs::write(&db_path, b"garbage garbage garbage").unwrap();

    let store = MetadataStore::open(&db_path).await.unwrap();
    assert_eq!(
        store.settings().get(core_store::NEEDS_FULL_RESCAN).await.unwrap().as_deref(),
        Some("true")
    );
    assert!(store.photos().find_by_id("old").await.unwrap().is_none());

    let provider = ScriptedProvider::new();
    provider.add_photo("fresh", payload(4));
    let sync = SyncController::new(provider.clone(), &store, EventBus::new(16), vec![]);

    let outcome = sync.run_scan(&CancellationToken::new()).await.unwrap();
    assert!(outcome.full);
    assert!(store.photos().find_by_id("fresh").await.unwrap().is_some());
    assert_eq!(
        store.settings().get(core_store::NEEDS_FULL_RESCAN).await.unwrap(),
        None
    );
}
