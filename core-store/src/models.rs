use sqlx::FromRow;

/// A photo row as the store holds it.
///
/// Cache state takes exactly one of three shapes (see [`CacheShape`]);
/// `cached_size_bytes` is the discriminant the candidate queries index
/// on: non-null means a physical resource exists.
#[derive(Debug, Clone, FromRow)]
pub struct Photo {
    pub photo_id: String,
    pub provider_id: String,
    pub parent_folder_id: Option<String>,
    pub filename: String,
    /// Capture or upload time, epoch milliseconds.
    pub created_at: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub first_seen_at: i64,
    pub last_seen_in_scan_at: i64,
    pub tombstoned: bool,
    pub last_viewed_at: Option<i64>,
    pub cached_path: Option<String>,
    pub cached_data: Option<Vec<u8>>,
    pub cached_mime: Option<String>,
    pub cached_size_bytes: Option<i64>,
    pub cached_at: Option<i64>,
}

/// The three legal shapes of a row's cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheShape {
    Uncached,
    File,
    Blob,
}

impl Photo {
    pub fn cache_shape(&self) -> CacheShape {
        if self.cached_data.is_some() {
            CacheShape::Blob
        } else if self.cached_path.is_some() {
            CacheShape::File
        } else {
            CacheShape::Uncached
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached_size_bytes.is_some()
    }
}
