//! # Event Bus System
//!
//! Decoupled communication between the engines and the front-end
//! boundary using `tokio::sync::broadcast`. The cache engine, sync
//! controller, and display scheduler emit typed events; the front-end
//! bridge subscribes and forwards frames and status lines over its
//! channel.
//!
//! ## Error Handling
//!
//! - `RecvError::Lagged(n)`: the subscriber missed `n` events; non-fatal.
//! - `RecvError::Closed`: all senders dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// A frame handed to the display front-end.
///
/// `bytes_base64` carries the image because the front-end boundary is a
/// text channel; binary consumers decode it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrameEvent {
    pub photo_id: String,
    pub bytes_base64: String,
    pub filename: String,
    pub created_at: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Cache engine lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CacheEvent {
    Cached { photo_id: String, bytes: u64 },
    Evicted { photo_id: String, bytes: u64 },
    CoolingEntered,
    CoolingExpired,
}

/// Sync controller lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    Started { full: bool },
    Completed { found: usize, tombstoned: u64 },
    Failed { message: String },
}

/// Top-level event enum published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "channel", content = "payload", rename_all = "camelCase")]
pub enum CoreEvent {
    /// A selected frame for the front-end.
    Frame(FrameEvent),
    /// Plain-text status line (the `UPDATE_STATUS` channel).
    Status { message: String },
    Cache(CacheEvent),
    Sync(SyncEvent),
}

/// Acknowledgement sent back by the front-end once a frame is rendered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrontEndAck {
    pub photo_id: String,
}

/// Broadcast event bus shared by the engines.
///
/// Thread-safe; clone or wrap in `Arc` freely. Emitting never blocks;
/// slow subscribers lag rather than backpressure the engines.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Publish an event. Returns the subscriber count, or an error when
    /// nobody is listening (ignorable).
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Convenience for the `UPDATE_STATUS` channel.
    pub fn status(&self, message: impl Into<String>) {
        let _ = self.emit(CoreEvent::Status {
            message: message.into(),
        });
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
