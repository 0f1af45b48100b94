//! Common error types for Voxlink.

use thiserror::Error;
use voxlink_crypto::ConfigError;

/// Result type alias using Voxlink's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Voxlink tooling.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err: Error = ConfigError::LateWindow(0).into();
        assert_eq!(
            err.to_string(),
            "configuration error: late_window must be between 1 and 127, got 0"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
