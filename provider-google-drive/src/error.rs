//! Error types for the Google Drive provider

use frame_traits::FrameError;
use thiserror::Error;

/// Google Drive provider errors
#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// Authentication failed or token is invalid
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// API request returned an error
    #[error("Google Drive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_seconds} seconds")]
    RateLimitExceeded { retry_after_seconds: u64 },

    /// File not found
    #[error("File not found: {file_id}")]
    FileNotFound { file_id: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Result type for Google Drive operations
pub type Result<T> = std::result::Result<T, GoogleDriveError>;

impl From<GoogleDriveError> for FrameError {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::AuthenticationFailed(msg) => FrameError::Authentication(msg),
            GoogleDriveError::ApiError {
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
            GoogleDriveError::RateLimitExceeded {
                retry_after_seconds,
            } => FrameError::RateLimited {
                retry_after_secs: retry_after_seconds,
            },
            GoogleDriveError::FileNotFound { file_id } => FrameError::NotFound(file_id),
            GoogleDriveError::ParseError(msg) => FrameError::Unknown(msg),
            GoogleDriveError::NetworkError(msg) => FrameError::Network(msg),
        }
    }
}
