//! # Cache Engine
//!
//! Tick-driven, single-flight prefetch of photo content into a bounded
//! local cache.
//!
//! Each tick:
//! 1. releases resources held by tombstoned rows
//! 2. evicts least-recently-shown entries while the byte cap is exceeded
//! 3. downloads up to a batch of uncached photos in parallel
//! 4. normalizes each image (fit-inside resize, flatten onto white,
//!    JPEG re-encode) when processing is enabled
//! 5. persists per the configured storage mode (file on disk or inline
//!    blob)
//!
//! After three consecutive ticks in which every download failed, the
//! engine cools for 60 seconds before attempting network I/O again.

pub mod engine;
pub mod error;
pub mod normalize;
pub mod storage;

pub use engine::{CacheEngine, CacheEngineConfig, EngineState, TickReport};
pub use error::{CacheError, Result};
