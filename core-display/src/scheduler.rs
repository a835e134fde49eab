//! Frame selection and emission.

use crate::error::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use core_runtime::events::{CoreEvent, EventBus, FrameEvent};
use core_store::{CacheShape, MetadataStore, Photo, PhotoRepository};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Periodic frame selection over the cached photo set.
pub struct DisplayScheduler {
    photos: PhotoRepository,
    events: EventBus,
    display_interval: Duration,
    /// Monotonic view timestamps: two frames in the same millisecond
    /// must still order deterministically for the cycle property.
    last_issued_ms: AtomicI64,
}

impl DisplayScheduler {
    pub fn new(store: &MetadataStore, events: EventBus, display_interval: Duration) -> Self {
        Self {
            photos: store.photos(),
            events,
            display_interval,
            last_issued_ms: AtomicI64::new(0),
        }
    }

    /// One display tick. Returns the emitted frame, or `None` when
    /// nothing is displayable (empty cache, missing file). Never
    /// blocks on cache or sync activity.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<Option<FrameEvent>> {
        self.maybe_reshuffle().await?;

        let Some(photo) = self.photos.next_display_candidate().await? else {
            debug!("No displayable photo, skipping tick");
            return Ok(None);
        };

        let Some(bytes) = self.load_bytes(&photo).await? else {
            return Ok(None);
        };

        let frame = FrameEvent {
            photo_id: photo.photo_id.clone(),
            bytes_base64: BASE64.encode(&bytes),
            filename: photo.filename.clone(),
            created_at: photo.created_at,
            width: photo.width,
            height: photo.height,
        };

        let _ = self.events.emit(CoreEvent::Frame(frame.clone()));
        debug!(photo_id = %photo.photo_id, bytes = bytes.len(), "Frame emitted");

        // The frame is already out; the view timestamp lands after.
        self.photos
            .mark_viewed(&photo.photo_id, self.next_view_timestamp())
            .await?;

        Ok(Some(frame))
    }

    /// Zero every `last_viewed_at` once the cycle is spent: no
    /// candidate has gone unshown for even half a display interval.
    async fn maybe_reshuffle(&self) -> Result<()> {
        let candidates = self.photos.count_display_candidates().await?;
        if candidates == 0 {
            return Ok(());
        }

        let cutoff_ms = Utc::now().timestamp_millis() - (self.display_interval.as_millis() as i64) / 2;
        if self.photos.count_unshown_since(cutoff_ms).await? == 0 {
            let reset = self.photos.reset_all_viewed().await?;
            info!(photos = reset, "Cycle complete, reshuffling");
        }
        Ok(())
    }

    async fn load_bytes(&self, photo: &Photo) -> Result<Option<Vec<u8>>> {
        match photo.cache_shape() {
            CacheShape::Blob => Ok(photo.cached_data.clone()),
            CacheShape::File => {
                let path = photo.cached_path.as_deref().unwrap_or_default();
                match tokio::fs::read(Path::new(path)).await {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!(photo_id = %photo.photo_id, path, "Cache file vanished, clearing row");
                        self.photos.clear_cache_fields(&photo.photo_id).await?;
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            CacheShape::Uncached => {
                // The candidate query filters on cached_size_bytes; a
                // row with a size but no resource is inconsistent.
                warn!(photo_id = %photo.photo_id, "Candidate row has no cache resource, clearing");
                self.photos.clear_cache_fields(&photo.photo_id).await?;
                Ok(None)
            }
        }
    }

    fn next_view_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self.last_issued_ms.fetch_max(now, Ordering::SeqCst);
        if previous >= now {
            // Same-millisecond tick; nudge past the previous stamp.
            self.last_issued_ms.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            now
        }
    }
}
