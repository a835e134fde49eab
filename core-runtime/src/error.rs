use frame_traits::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Error> for FrameError {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(msg) => FrameError::Configuration(msg),
            other => FrameError::Unknown(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
