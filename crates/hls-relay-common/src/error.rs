//! Common error type for request parameter validation.

/// Common error type for hls-relay.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// A channel identifier failed validation.
    #[error("Invalid channel id: {0}")]
    InvalidChannel(String),

    /// A segment or playlist file name failed validation.
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),
}

impl Error {
    /// Create a new InvalidChannel error.
    pub fn invalid_channel<S: Into<String>>(msg: S) -> Self {
        Self::InvalidChannel(msg.into())
    }

    /// Create a new InvalidFileName error.
    pub fn invalid_file_name<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFileName(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
