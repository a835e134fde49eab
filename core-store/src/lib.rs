//! # Metadata Store
//!
//! Embedded SQLite store holding photo rows, cache state, and
//! provider-scoped settings (sync cursors, rescan flags).
//!
//! ## Features
//!
//! - **WAL Mode**: one serialized writer, concurrent readers
//! - **Schema at open**: tables and indexes are created on every open so
//!   the corruption-recovery path can rebuild an empty store at runtime
//! - **Corruption recovery**: a failed integrity check deletes the
//!   backing files, re-opens empty, and flags `sync.needsFullRescan`
//!
//! ## Concurrency discipline
//!
//! All writes funnel through SQLite's own writer serialization. Batch
//! upserts and tombstone sweeps run inside transactions; no transaction
//! ever spans a provider call.

pub mod db;
pub mod error;
pub mod models;
pub mod photos;
pub mod settings;

pub use db::MetadataStore;
pub use error::{Result, StoreError};
pub use models::{CacheShape, Photo};
pub use photos::PhotoRepository;
pub use settings::{cursor_key, SettingsRepository, LAST_FULL_SCAN_AT, NEEDS_FULL_RESCAN};
