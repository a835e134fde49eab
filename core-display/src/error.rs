use frame_traits::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("store error: {0}")]
    Store(#[from] core_store::StoreError),

    #[error("cache file unreadable: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DisplayError> for FrameError {
    fn from(err: DisplayError) -> Self {
        FrameError::Unknown(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DisplayError>;
