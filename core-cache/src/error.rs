use frame_traits::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] core_store::StoreError),

    #[error("cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("image rejected: {0}")]
    Validation(String),

    #[error("provider error: {0}")]
    Provider(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, CacheError>;
