//! Client error types.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::models::FatalErrorType;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, BlcError>;

/// Errors that can occur while talking to the forwarding service.
#[derive(Error, Debug)]
pub enum BlcError {
    /// Connection-related errors (connect failure, closed connector, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// The peer stayed silent past the read timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Payload did not match the schema of its command
    #[error("Decode error: {0}")]
    Decode(String),

    /// Frame was not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server signaled an unrecoverable condition
    #[error("Fatal error ({kind}): {message}")]
    Fatal {
        kind: FatalErrorType,
        message: String,
    },
}

impl BlcError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether the server asked us to stop for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Whether the error came from a malformed inbound frame.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Json(_))
    }

    /// Whether the connection loop may retry after this error.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

impl From<tungstenite::Error> for BlcError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let fatal = BlcError::Fatal {
            kind: FatalErrorType::AuthCodeError,
            message: "bad code".to_string(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_recoverable());

        let timeout = BlcError::Timeout(Duration::from_secs(15));
        assert!(timeout.is_recoverable());
        assert!(!timeout.is_decode());

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(BlcError::from(json).is_decode());
        assert!(BlcError::decode("missing key").is_recoverable());
    }

    #[test]
    fn test_fatal_display() {
        let fatal = BlcError::Fatal {
            kind: FatalErrorType::AuthCodeError,
            message: "invalid auth code".to_string(),
        };
        assert_eq!(
            fatal.to_string(),
            "Fatal error (AUTH_CODE_ERROR): invalid auth code"
        );
    }
}
