//! Transport abstraction and the WebSocket implementation

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};

use crate::{
    error::{Error, Result},
    frame::Frame,
};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive reconnect attempts
    pub max_retries: u32,
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Optional upper bound on any single delay; unbounded by default
    pub max_delay: Option<Duration>,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: None,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff with the given ceiling and base delay, default multiplier, no cap
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// One underlying connection. A fresh transport is created per attempt and
/// discarded when it ends; it is never reused.
#[async_trait]
pub trait Transport: Send {
    /// Transmit one frame
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next inbound frame; `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the driver polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Factory for transports. This is the seam tests use to substitute an
/// in-memory transport for the network.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport to `url`. Resolves once the connection is open.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over WebSocket (`ws://` or `wss://`)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

/// Reject anything that is not a WebSocket URL before touching the network
pub fn validate_ws_url(url: &str) -> Result<()> {
    match url.split_once("://") {
        Some(("ws" | "wss", rest)) if !rest.is_empty() => Ok(()),
        _ => Err(Error::InvalidUrl(url.to_string())),
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        validate_ws_url(url)?;
        let (stream, response) = connect_async(url).await?;
        tracing::debug!("WebSocket handshake complete ({})", response.status());
        Ok(Box::new(WsTransport { stream }))
    }
}

/// A live WebSocket connection
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(bytes) => Message::binary(bytes),
        };
        self.stream.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Peer sent close frame: {:?}", frame);
                    return None;
                }
                // Pings are answered by tungstenite itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_base() {
        let config = RetryConfig::new(3, Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_default_schedule() {
        let config = RetryConfig::default();
        let delays: Vec<u128> = (1..=config.max_retries)
            .map(|n| config.delay_for_attempt(n).as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_delay: Some(Duration::from_secs(1)),
            ..RetryConfig::new(10, Duration::from_millis(250))
        };
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(9), Duration::from_secs(1));
    }

    #[test]
    fn test_large_base_delay_keeps_doubling() {
        let config = RetryConfig::new(6, Duration::from_secs(20));
        let delays: Vec<u64> = (1..=config.max_retries)
            .map(|n| config.delay_for_attempt(n).as_secs())
            .collect();
        assert_eq!(delays, vec![20, 40, 80, 160, 320, 640]);
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let config = RetryConfig::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(5000), Duration::MAX);
    }

    #[test]
    fn test_attempt_zero_uses_base_delay() {
        let config = RetryConfig::new(1, Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_ws_url() {
        assert!(validate_ws_url("ws://localhost:8080/ws").is_ok());
        assert!(validate_ws_url("wss://example.com/ws").is_ok());
        assert!(matches!(
            validate_ws_url("http://localhost:8080/ws"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(validate_ws_url("ws://").is_err());
        assert!(validate_ws_url("localhost").is_err());
    }

    #[tokio::test]
    async fn test_ws_connector_rejects_non_ws_scheme() {
        let result = WsConnector.connect("https://example.com").await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
