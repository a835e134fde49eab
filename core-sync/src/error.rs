use frame_traits::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] core_store::StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] FrameError),

    #[error("scan cancelled")]
    Cancelled,
}

impl From<SyncError> for FrameError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Provider(e) => e,
            SyncError::Cancelled => FrameError::Cancelled,
            SyncError::Store(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
