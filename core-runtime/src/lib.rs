//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the photo-frame
//! backend:
//! - Configuration loading and validation
//! - Logging and tracing infrastructure
//! - Event bus system (frames, status, cache, sync)
//! - HTTP transport implementation
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the engine crates depend
//! on. It establishes the logging conventions and event broadcasting
//! mechanisms used throughout the system; the engines themselves are
//! wired together by the host binary.

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod logging;

pub use config::{FrameConfig, ProviderConfig, ProviderKind, StoreConfig};
pub use error::{Error, Result};
pub use events::{CacheEvent, CoreEvent, EventBus, FrameEvent, FrontEndAck, SyncEvent};
pub use http::ReqwestClient;
