//! Error types for nargis-agent

use std::time::Duration;

use thiserror::Error;

/// Result type alias using nargis-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session operations.
///
/// Transport trouble is never reported here; it shows up as connection
/// status. These cover caller mistakes and readiness timeouts.
#[derive(Error, Debug)]
pub enum Error {
    /// The channel did not reach `open` in time
    #[error("Realtime channel did not open within {0:?}")]
    NotConnected(Duration),

    /// Agent voice mode was requested but is not enabled
    #[error("Agent mode is not enabled for this session")]
    AgentModeUnavailable,

    /// Text was empty after sanitising
    #[error("Message is empty")]
    EmptyMessage,

    /// The turn did not end in time
    #[error("Timed out after {0:?} waiting for the turn to end")]
    TurnTimeout(Duration),

    /// An error from the realtime layer
    #[error(transparent)]
    Realtime(#[from] nargis_realtime::Error),
}

impl Error {
    /// Whether retrying after the connection recovers may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NotConnected(_) | Error::TurnTimeout(_))
    }
}
