use frame_traits::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OneDriveError {
    #[error("Graph API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Throttled, retry after {0} seconds")]
    Throttled(u64),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Failed to parse Graph response: {0}")]
    ParseError(String),
}

impl From<OneDriveError> for FrameError {
    fn from(error: OneDriveError) -> Self {
        match error {
            OneDriveError::ApiError {
                status_code,
                message,
            } => match status_code {
                401 | 403 => FrameError::Authentication(message),
                404 => FrameError::NotFound(message),
                429 => FrameError::RateLimited {
                    retry_after_secs: 0,
                },
                500..=599 => FrameError::Network(format!("status {}: {}", status_code, message)),
                _ => FrameError::Unknown(format!("status {}: {}", status_code, message)),
            },
            OneDriveError::Throttled(secs) => FrameError::RateLimited {
                retry_after_secs: secs,
            },
            OneDriveError::AuthRequired => {
                FrameError::Authentication("authentication required".to_string())
            }
            OneDriveError::ParseError(msg) => FrameError::Unknown(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, OneDriveError>;
