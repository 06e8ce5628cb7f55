//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Upstream error: {0}")]
    Source(#[from] queue_source::SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Acquisition controller unavailable: {0}")]
    ControllerUnavailable(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn controller_unavailable(msg: impl Into<String>) -> Self {
        Self::ControllerUnavailable(msg.into())
    }
}
