use frame_traits::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("store file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store rebuild failed: {0}")]
    RebuildFailed(String),
}

impl From<StoreError> for FrameError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Integrity(msg) | StoreError::RebuildFailed(msg) => {
                FrameError::StoreIntegrity(msg)
            }
            other => FrameError::Unknown(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
