//! # Sync Controller
//!
//! Reconciles the provider's view of the configured folders into the
//! metadata store.
//!
//! ## Workflow
//!
//! ### Full scan
//! 1. Recursively list every configured folder spec
//! 2. Union the results by photo id, first occurrence wins
//! 3. Batch-upsert records, refreshing `last_seen_in_scan_at`
//! 4. Tombstone rows not revisited since the scan started
//!
//! ### Incremental scan
//! 1. Fetch changes recorded after the persisted cursor
//! 2. Apply creations/updates that fall under a configured folder
//!    (ancestor walk, depth-bounded and cycle-guarded)
//! 3. Apply deletions as tombstones
//! 4. Persist the next cursor only after the whole page applied
//!
//! On startup the controller runs a full scan when the store demands a
//! rescan or no cursor exists; every later tick is incremental.

pub mod controller;
pub mod error;

pub use controller::{ScanOutcome, SyncController};
pub use error::{Result, SyncError};
