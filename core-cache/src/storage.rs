//! File-mode cache storage.
//!
//! Final paths are `<cacheDir>/<photoId>.jpg`. Writes land in a temp
//! sibling first and rename into place, so a crash mid-write never
//! leaves a half-written final file. Blob-mode entries live in the
//! store and never touch this module.

use crate::error::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory handle for file-mode entries.
#[derive(Clone)]
pub struct CacheStorage {
    dir: PathBuf,
}

impl CacheStorage {
    /// Create the storage, ensuring the directory exists.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, photo_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jpg", sanitize(photo_id)))
    }

    /// Write bytes via a temp sibling, then rename into place.
    pub async fn write(&self, photo_id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let final_path = self.path_for(photo_id);
        let tmp_path = final_path.with_extension("jpg.tmp");

        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        debug!(path = %final_path.display(), bytes = bytes.len(), "Cache file written");
        Ok(final_path)
    }

    /// Unlink a cache file; an already-absent file is not an error.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    /// Startup reconciliation: sweep temp files from a crashed tick and
    /// delete orphaned files no row points at. Returns the paths kept.
    pub async fn sweep(&self, known_paths: &HashSet<PathBuf>) -> Result<usize> {
        let mut removed = 0usize;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let is_tmp = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("tmp"))
                .unwrap_or(false);

            if is_tmp || !known_paths.contains(&path) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to sweep cache file");
                } else {
                    removed += 1;
                    debug!(path = %path.display(), "Swept stale cache file");
                }
            }
        }

        if removed > 0 {
            info!(removed, "Cache directory reconciled");
        }
        Ok(removed)
    }
}

/// Provider ids are opaque; keep them filesystem-safe.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_is_atomic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::open(dir.path()).await.unwrap();

        let path = storage.write("photo1", b"jpeg bytes").await.unwrap();
        assert_eq!(storage.read(&path).await.unwrap(), b"jpeg bytes");
        assert!(!path.with_extension("jpg.tmp").exists());
    }

    #[tokio::test]
    async fn remove_tolerates_absent_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::open(dir.path()).await.unwrap();

        let path = storage.path_for("never-written");
        storage.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_tmp_and_orphans_keeps_known() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::open(dir.path()).await.unwrap();

        let kept = storage.write("kept", b"keep me").await.unwrap();
        let orphan = storage.write("orphan", b"no row for me").await.unwrap();
        std::fs::write(dir.path().join("crashed.jpg.tmp"), b"partial").unwrap();

        let known: HashSet<PathBuf> = [kept.clone()].into_iter().collect();
        let removed = storage.sweep(&known).await.unwrap();

        assert_eq!(removed, 2);
        assert!(kept.exists());
        assert!(!orphan.exists());
        assert!(!dir.path().join("crashed.jpg.tmp").exists());
    }

    #[test]
    fn ids_are_sanitized_for_the_filesystem() {
        assert_eq!(sanitize("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize("normal-id_1.x"), "normal-id_1.x");
    }
}
