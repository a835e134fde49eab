use frame_traits::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credentials file unreadable at {path}: {reason}")]
    CredentialsUnavailable { path: String, reason: String },

    #[error("token file unreadable at {path}: {reason}")]
    TokensUnavailable { path: String, reason: String },

    #[error("token file corrupted: {0}")]
    TokenCorrupted(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("token persistence failed: {0}")]
    PersistFailed(String),
}

impl From<AuthError> for FrameError {
    fn from(err: AuthError) -> Self {
        FrameError::Authentication(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
