//! The tick-driven cache engine.
//!
//! States: `Idle`, `Ticking`, `Cooling`, `Stopped`. Ticks are
//! single-flight: a timer firing while the previous tick still runs is
//! dropped via `try_lock` on the tick mutex. Within a tick, eviction
//! precedes prefetch so space is freed before new downloads are
//! admitted.

use crate::error::{CacheError, Result};
use crate::normalize;
use crate::storage::CacheStorage;
use chrono::Utc;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_store::{MetadataStore, Photo, PhotoRepository};
use frame_traits::{CloudProvider, FrameError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Eviction drains to cap minus this headroom.
const EVICTION_HEADROOM_BYTES: u64 = 10 * 1024 * 1024;

/// Hard ceiling on raw downloaded bytes per photo.
const MAX_RAW_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Smallest plausible image output.
const MIN_OUTPUT_BYTES: usize = 1024;

/// Consecutive all-failed ticks before the engine cools.
const FAILED_TICKS_LIMIT: u32 = 3;

/// How long a cooling engine forgoes network I/O.
const COOLING_PERIOD: Duration = Duration::from_secs(60);

/// Ceiling on waiting for an in-flight tick during shutdown.
const SHUTDOWN_SETTLE: Duration = Duration::from_secs(5);

/// Rows drained per eviction query round.
const EVICTION_PAGE: i64 = 32;

/// Engine configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct CacheEngineConfig {
    pub max_cache_bytes: u64,
    pub prefetch_batch: usize,
    pub download_timeout: Duration,
    pub show_width: u32,
    pub show_height: u32,
    pub jpeg_quality: u8,
    /// true stores bytes inline in the row; false writes
    /// `<cacheDir>/<photoId>.jpg`.
    pub use_blob_storage: bool,
    pub cache_dir: PathBuf,
    /// Graceful bypass: when false, original bytes are cached unchanged.
    pub normalize_images: bool,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: 200 * 1024 * 1024,
            prefetch_batch: 5,
            download_timeout: Duration::from_secs(30),
            show_width: 1920,
            show_height: 1080,
            jpeg_quality: 90,
            use_blob_storage: false,
            cache_dir: PathBuf::from("cache"),
            normalize_images: true,
        }
    }
}

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Ticking,
    Cooling,
    Stopped,
}

/// What one tick did; the runtime logs it and tests assert on it.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    /// Timer fired while the previous tick was still running.
    pub dropped: bool,
    /// Downloads were skipped because the engine is cooling.
    pub cooled: bool,
    /// Downloads were skipped because the provider host did not resolve.
    pub offline: bool,
    pub evicted_count: usize,
    pub evicted_bytes: u64,
    pub attempted: usize,
    pub succeeded: usize,
    pub network_failures: usize,
    pub validation_failures: usize,
}

enum DownloadOutcome {
    Success,
    NetworkFail,
    ValidationFail,
}

/// The prefetch cache engine.
pub struct CacheEngine {
    config: CacheEngineConfig,
    photos: PhotoRepository,
    provider: Arc<dyn CloudProvider>,
    events: EventBus,
    storage: Option<CacheStorage>,
    tick_lock: tokio::sync::Mutex<()>,
    state: std::sync::Mutex<EngineState>,
    failed_ticks: AtomicU32,
    cooling_until: std::sync::Mutex<Option<Instant>>,
    download_slots: Arc<Semaphore>,
}

impl CacheEngine {
    pub async fn new(
        config: CacheEngineConfig,
        store: &MetadataStore,
        provider: Arc<dyn CloudProvider>,
        events: EventBus,
    ) -> Result<Self> {
        let storage = if config.use_blob_storage {
            None
        } else {
            Some(CacheStorage::open(&config.cache_dir).await?)
        };
        let download_slots = Arc::new(Semaphore::new(config.prefetch_batch));

        Ok(Self {
            config,
            photos: store.photos(),
            provider,
            events,
            storage,
            tick_lock: tokio::sync::Mutex::new(()),
            state: std::sync::Mutex::new(EngineState::Idle),
            failed_ticks: AtomicU32::new(0),
            cooling_until: std::sync::Mutex::new(None),
            download_slots,
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn consecutive_failed_ticks(&self) -> u32 {
        self.failed_ticks.load(Ordering::SeqCst)
    }

    /// Startup reconciliation (file mode): clear rows whose file is
    /// gone, sweep temp files and orphans so every file on disk matches
    /// a row.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let mut known: HashSet<PathBuf> = HashSet::new();
        for (photo_id, path) in self.photos.rows_with_cached_path().await? {
            let path_buf = PathBuf::from(&path);
            if path_buf.exists() {
                known.insert(path_buf);
            } else {
                warn!(photo_id = %photo_id, "Cache file missing, clearing row");
                self.photos.clear_cache_fields(&photo_id).await?;
            }
        }

        storage.sweep(&known).await?;
        Ok(())
    }

    /// Run one tick. Single-flight: overlapping invocations return a
    /// `dropped` report immediately.
    pub async fn tick(&self) -> Result<TickReport> {
        if self.state() == EngineState::Stopped {
            return Ok(TickReport {
                dropped: true,
                ..TickReport::default()
            });
        }

        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Tick dropped, previous tick still in flight");
            return Ok(TickReport {
                dropped: true,
                ..TickReport::default()
            });
        };

        self.set_state(EngineState::Ticking);
        let result = self.run_tick().await;

        let next = if self.state() == EngineState::Stopped {
            EngineState::Stopped
        } else if self.cooling_active() {
            EngineState::Cooling
        } else {
            EngineState::Idle
        };
        self.set_state(next);

        result
    }

    /// Stop the engine: no further ticks run; an in-flight tick gets a
    /// bounded window to settle its store writes.
    pub async fn shutdown(&self) {
        info!("Cache engine stopping");
        self.set_state(EngineState::Stopped);
        let _ = tokio::time::timeout(SHUTDOWN_SETTLE, self.tick_lock.lock()).await;
    }

    fn cooling_active(&self) -> bool {
        self.cooling_until
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    async fn run_tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        // Tombstoned rows release their resources within one eviction
        // pass, regardless of the byte cap.
        for row in self.photos.tombstoned_with_cache(EVICTION_PAGE).await? {
            let freed = self.release(&row).await?;
            report.evicted_count += 1;
            report.evicted_bytes += freed;
        }

        // Eviction before prefetch: free space, then admit downloads.
        let mut total = self.photos.total_cached_bytes().await?.max(0) as u64;
        if total > self.config.max_cache_bytes {
            let target = self
                .config
                .max_cache_bytes
                .saturating_sub(EVICTION_HEADROOM_BYTES);

            'evict: while total > target {
                let victims = self.photos.eviction_candidates(EVICTION_PAGE).await?;
                if victims.is_empty() {
                    break;
                }
                for victim in victims {
                    if total <= target {
                        break 'evict;
                    }
                    let freed = self.release(&victim).await?;
                    total = total.saturating_sub(freed);
                    report.evicted_count += 1;
                    report.evicted_bytes += freed;
                }
            }
            info!(
                evicted = report.evicted_count,
                freed_bytes = report.evicted_bytes,
                total_bytes = total,
                "Eviction pass complete"
            );
        }

        // While cooling, the tick ends here: no provider I/O.
        {
            let mut cooling = self.cooling_until.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(until) = *cooling {
                if Instant::now() < until {
                    debug!("Cooling, skipping downloads");
                    report.cooled = true;
                    return Ok(report);
                }
                *cooling = None;
                self.failed_ticks.store(0, Ordering::SeqCst);
                let _ = self.events.emit(CoreEvent::Cache(CacheEvent::CoolingExpired));
                info!("Cooling period expired, downloads resume");
            }
        }

        // After a failing tick, probe DNS before burning another batch
        // of doomed downloads.
        if self.failed_ticks.load(Ordering::SeqCst) > 0 && !self.provider.is_reachable().await {
            warn!("Provider unreachable, skipping downloads this tick");
            report.offline = true;
            self.note_failed_tick();
            return Ok(report);
        }

        let candidates = self
            .photos
            .prefetch_candidates(self.config.prefetch_batch as i64)
            .await?;
        if candidates.is_empty() {
            return Ok(report);
        }

        let mut tasks: JoinSet<DownloadOutcome> = JoinSet::new();
        for row in candidates {
            let permit = self
                .download_slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| CacheError::Validation("download pool closed".to_string()))?;
            let provider = self.provider.clone();
            let photos = self.photos.clone();
            let storage = self.storage.clone();
            let config = self.config.clone();
            let events = self.events.clone();

            report.attempted += 1;
            tasks.spawn(async move {
                let _permit = permit;
                Self::download_one(provider, photos, storage, config, events, row).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(DownloadOutcome::Success) => report.succeeded += 1,
                Ok(DownloadOutcome::NetworkFail) => report.network_failures += 1,
                Ok(DownloadOutcome::ValidationFail) => report.validation_failures += 1,
                Err(e) => {
                    warn!(error = %e, "Download task panicked or was aborted");
                    report.network_failures += 1;
                }
            }
        }

        if report.succeeded > 0 {
            self.failed_ticks.store(0, Ordering::SeqCst);
        } else {
            self.note_failed_tick();
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            network_failures = report.network_failures,
            validation_failures = report.validation_failures,
            "Prefetch pass complete"
        );
        Ok(report)
    }

    fn note_failed_tick(&self) {
        let failed = self.failed_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if failed >= FAILED_TICKS_LIMIT {
            *self
                .cooling_until
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + COOLING_PERIOD);
            let _ = self.events.emit(CoreEvent::Cache(CacheEvent::CoolingEntered));
            self.events
                .status("downloads suspended after repeated failures");
            warn!(failed_ticks = failed, "Entering cooling state");
        }
    }

    /// Release a row's physical resource and null its cache columns.
    async fn release(&self, row: &Photo) -> Result<u64> {
        if let Some(path) = &row.cached_path {
            // Dispatch on the row's shape, not the configured mode: a
            // mid-life mode flip leaves file rows behind.
            match &self.storage {
                Some(storage) => storage.remove(Path::new(path)).await?,
                None => remove_file_tolerant(Path::new(path)).await?,
            }
        }
        self.photos.clear_cache_fields(&row.photo_id).await?;

        let freed = row.cached_size_bytes.unwrap_or(0).max(0) as u64;
        let _ = self.events.emit(CoreEvent::Cache(CacheEvent::Evicted {
            photo_id: row.photo_id.clone(),
            bytes: freed,
        }));
        debug!(photo_id = %row.photo_id, freed, "Cache entry released");
        Ok(freed)
    }

    async fn download_one(
        provider: Arc<dyn CloudProvider>,
        photos: PhotoRepository,
        storage: Option<CacheStorage>,
        config: CacheEngineConfig,
        events: EventBus,
        row: Photo,
    ) -> DownloadOutcome {
        let raw = match provider
            .download_content(&row.photo_id, config.download_timeout, MAX_RAW_DOWNLOAD_BYTES)
            .await
        {
            Ok(bytes) => bytes,
            Err(FrameError::NotFound(_)) | Err(FrameError::Validation(_)) => {
                // Permanent: the photo is gone or over the byte ceiling.
                warn!(photo_id = %row.photo_id, "Content unretrievable, tombstoning");
                let _ = photos.mark_tombstoned(&row.photo_id).await;
                return DownloadOutcome::ValidationFail;
            }
            Err(e) => {
                debug!(photo_id = %row.photo_id, error = %e, "Download failed");
                return DownloadOutcome::NetworkFail;
            }
        };

        let (data, mime) = if config.normalize_images {
            match normalize::normalize(
                &raw,
                config.show_width,
                config.show_height,
                config.jpeg_quality,
            ) {
                Ok(normalized) => (normalized.bytes, "image/jpeg"),
                Err(e) => {
                    warn!(photo_id = %row.photo_id, error = %e, "Normalization rejected image, tombstoning");
                    let _ = photos.mark_tombstoned(&row.photo_id).await;
                    return DownloadOutcome::ValidationFail;
                }
            }
        } else {
            (raw.to_vec(), mime_for_filename(&row.filename))
        };

        if data.len() < MIN_OUTPUT_BYTES {
            warn!(photo_id = %row.photo_id, bytes = data.len(), "Output implausibly small, tombstoning");
            let _ = photos.mark_tombstoned(&row.photo_id).await;
            return DownloadOutcome::ValidationFail;
        }

        let now_ms = Utc::now().timestamp_millis();
        let persisted = match &storage {
            Some(storage) => match storage.write(&row.photo_id, &data).await {
                Ok(path) => {
                    photos
                        .set_cached_file(
                            &row.photo_id,
                            &path.to_string_lossy(),
                            data.len() as i64,
                            now_ms,
                        )
                        .await
                }
                Err(e) => {
                    warn!(photo_id = %row.photo_id, error = %e, "Cache file write failed");
                    return DownloadOutcome::NetworkFail;
                }
            },
            None => photos.set_cached_blob(&row.photo_id, &data, mime, now_ms).await,
        };

        match persisted {
            Ok(()) => {
                let _ = events.emit(CoreEvent::Cache(CacheEvent::Cached {
                    photo_id: row.photo_id.clone(),
                    bytes: data.len() as u64,
                }));
                debug!(photo_id = %row.photo_id, bytes = data.len(), "Photo cached");
                DownloadOutcome::Success
            }
            Err(e) => {
                warn!(photo_id = %row.photo_id, error = %e, "Cache row update failed");
                DownloadOutcome::NetworkFail
            }
        }
    }
}

async fn remove_file_tolerant(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Best-effort mime when normalization is bypassed and original bytes
/// are cached.
fn mime_for_filename(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" | "heif" => "image/heif",
        _ => "image/jpeg",
    }
}
