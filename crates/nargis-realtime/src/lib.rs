//! nargis-realtime: resilient realtime channel to the nargis gateway
//!
//! A [`RealtimeConnection`] owns one logical bidirectional channel. It queues
//! outbound messages until the channel opens, parses inbound frames, fans
//! them out to registered handlers, and reconnects with exponential backoff
//! when the underlying transport drops.

pub mod connection;
pub mod error;
pub mod frame;
mod handlers;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use connection::{ConnectionConfig, ConnectionStatus, DEFAULT_MAX_QUEUED, RealtimeConnection};
pub use error::{Error, Result};
pub use frame::{Frame, Inbound, Outbound};
pub use handlers::Subscription;
pub use transport::{Connector, RetryConfig, Transport, WsConnector, WsTransport};
