//! # Configuration Module
//!
//! Loads and validates the daemon configuration from a JSON file.
//!
//! ## Overview
//!
//! The configuration is read once at startup and is read-only
//! afterwards. Validation is fail-fast with actionable messages: a
//! missing credentials path or a zero interval aborts startup before
//! any subsystem runs.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::FrameConfig;
//!
//! let config = FrameConfig::load("config.json")?;
//! ```

use crate::error::{Error, Result};
use frame_traits::FolderSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which provider conformance to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    GoogleDrive,
    Onedrive,
}

/// Provider wiring: credentials, token file, folders to scan.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    /// Ordered list of folders; the union of their photos is displayed,
    /// first occurrence of a photo id wins.
    #[serde(default)]
    pub folders: Vec<FolderSpec>,
}

/// Metadata store location.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("photoframe.db")
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameConfig {
    pub provider: ProviderKind,

    pub provider_config: ProviderConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Display scheduler period, milliseconds.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval: u64,

    /// Sync controller period, milliseconds.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval: u64,

    /// Cache engine period, milliseconds.
    #[serde(default = "default_cache_tick_interval_ms")]
    pub cache_tick_interval: u64,

    /// Cache byte ceiling, MiB.
    #[serde(default = "default_max_cache_size_mb")]
    pub max_cache_size_mb: u64,

    /// Downloads per cache tick.
    #[serde(default = "default_prefetch_batch_size")]
    pub prefetch_batch_size: usize,

    /// Normalization resize target.
    #[serde(default = "default_show_width")]
    pub show_width: u32,
    #[serde(default = "default_show_height")]
    pub show_height: u32,

    /// JPEG re-encode quality, 1-100.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// true stores image bytes inline in the row; false writes files
    /// under `cachePath`.
    #[serde(default)]
    pub use_blob_storage: bool,

    /// Base directory for file-mode cache entries.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_update_interval_ms() -> u64 {
    60_000
}
fn default_scan_interval_ms() -> u64 {
    6 * 60 * 60 * 1000
}
fn default_cache_tick_interval_ms() -> u64 {
    30_000
}
fn default_max_cache_size_mb() -> u64 {
    200
}
fn default_prefetch_batch_size() -> usize {
    5
}
fn default_show_width() -> u32 {
    1920
}
fn default_show_height() -> u32 {
    1080
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("cache")
}

impl FrameConfig {
    /// Read, parse, and validate the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: FrameConfig = serde_json::from_slice(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation with actionable messages.
    pub fn validate(&self) -> Result<()> {
        if self.provider_config.credentials_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "providerConfig.credentialsPath must be set".to_string(),
            ));
        }
        if self.provider_config.token_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "providerConfig.tokenPath must be set".to_string(),
            ));
        }
        if self.update_interval == 0 || self.scan_interval == 0 || self.cache_tick_interval == 0 {
            return Err(Error::Config(
                "updateInterval, scanInterval and cacheTickInterval must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Config(format!(
                "jpegQuality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.prefetch_batch_size == 0 {
            return Err(Error::Config(
                "prefetchBatchSize must be positive".to_string(),
            ));
        }
        if self.max_cache_size_mb == 0 {
            return Err(Error::Config("maxCacheSizeMB must be positive".to_string()));
        }
        if self.show_width == 0 || self.show_height == 0 {
            return Err(Error::Config(
                "showWidth and showHeight must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval)
    }

    pub fn cache_tick_interval(&self) -> Duration {
        Duration::from_millis(self.cache_tick_interval)
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "provider": "google-drive",
        "providerConfig": {
            "credentialsPath": "/etc/frame/credentials.json",
            "tokenPath": "/etc/frame/tokens.json",
            "folders": [{"id": "folder1", "depth": 2}, {"depth": -1}]
        }
    }"#;

    #[test]
    fn minimal_config_gets_documented_defaults() {
        let config: FrameConfig = serde_json::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.provider, ProviderKind::GoogleDrive);
        assert_eq!(config.update_interval, 60_000);
        assert_eq!(config.scan_interval, 21_600_000);
        assert_eq!(config.cache_tick_interval, 30_000);
        assert_eq!(config.max_cache_size_mb, 200);
        assert_eq!(config.prefetch_batch_size, 5);
        assert_eq!(config.jpeg_quality, 90);
        assert!(!config.use_blob_storage);

        assert_eq!(config.provider_config.folders.len(), 2);
        assert_eq!(
            config.provider_config.folders[0].folder_id.as_deref(),
            Some("folder1")
        );
        assert_eq!(config.provider_config.folders[1].folder_id, None);
        assert_eq!(config.provider_config.folders[1].depth, -1);
    }

    #[test]
    fn bad_jpeg_quality_is_rejected() {
        let mut config: FrameConfig = serde_json::from_str(MINIMAL).unwrap();
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.jpeg_quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config: FrameConfig = serde_json::from_str(MINIMAL).unwrap();
        config.update_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let err = FrameConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_parses_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = FrameConfig::load(&path).unwrap();
        assert_eq!(config.provider, ProviderKind::GoogleDrive);
    }
}
