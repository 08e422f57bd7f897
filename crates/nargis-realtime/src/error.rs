//! Error types for nargis-realtime

use thiserror::Error;

/// Result type alias using nargis-realtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by transports and connectors.
///
/// These never escape [`RealtimeConnection`](crate::RealtimeConnection)'s
/// public API; the driver turns them into `error` status events.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket protocol or I/O failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint is not a ws:// or wss:// URL
    #[error("Invalid endpoint: {0}")]
    InvalidUrl(String),

    /// The peer refused or dropped the connection
    #[error("Connection refused: {0}")]
    Refused(String),

    /// The transport was already closed
    #[error("Transport closed")]
    Closed,
}

impl Error {
    /// Whether the error happened before any frame could be exchanged.
    ///
    /// Used only for logging; every error is retried the same way.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Error::InvalidUrl(_) | Error::Refused(_))
            || matches!(
                self,
                Error::WebSocket(tokio_tungstenite::tungstenite::Error::Io(_))
                    | Error::WebSocket(tokio_tungstenite::tungstenite::Error::Url(_))
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failure_variants() {
        assert!(Error::InvalidUrl("http://x".into()).is_connect_failure());
        assert!(Error::Refused("nope".into()).is_connect_failure());
        assert!(!Error::Closed.is_connect_failure());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::InvalidUrl("ftp://host".into()).to_string(),
            "Invalid endpoint: ftp://host"
        );
        assert_eq!(Error::Closed.to_string(), "Transport closed");
    }
}
