use thiserror::Error;

/// Error taxonomy shared across the photo-frame subsystems.
///
/// Provider and store crates keep their own error enums and convert into
/// this taxonomy at the crate seam. The retryable/fatal split drives the
/// recovery policy: components recover locally from retryable errors,
/// fatal errors surface to the runtime.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store integrity failure: {0}")]
    StoreIntegrity(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),
}

impl FrameError {
    /// Transient errors that a provider retries internally and a tick
    /// survives: network trouble and rate limits.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FrameError::Network(_) | FrameError::RateLimited { .. } | FrameError::Unknown(_)
        )
    }

    /// Errors that end the affected subsystem until operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrameError::Configuration(_)
                | FrameError::Authentication(_)
                | FrameError::StoreIntegrity(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
