//! Wire framing: what callers send, what transports carry, what handlers get

use serde::Serialize;

/// A payload queued for transmission by [`RealtimeConnection::send`].
///
/// [`RealtimeConnection::send`]: crate::RealtimeConnection::send
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Structured payload, serialized to compact JSON text
    Json(serde_json::Value),
    /// Raw text, transmitted unmodified (control sentinels such as `STOP`)
    Text(String),
    /// Binary payload (audio chunks)
    Binary(Vec<u8>),
}

impl Outbound {
    /// Build a JSON payload from any serializable value
    pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Outbound::Json)
    }

    /// Convert into the frame that goes on the wire
    pub fn into_frame(self) -> Frame {
        match self {
            Outbound::Json(value) => Frame::Text(value.to_string()),
            Outbound::Text(text) => Frame::Text(text),
            Outbound::Binary(bytes) => Frame::Binary(bytes),
        }
    }
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Outbound::Text(text.to_string())
    }
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Outbound::Text(text)
    }
}

impl From<serde_json::Value> for Outbound {
    fn from(value: serde_json::Value) -> Self {
        Outbound::Json(value)
    }
}

impl From<Vec<u8>> for Outbound {
    fn from(bytes: Vec<u8>) -> Self {
        Outbound::Binary(bytes)
    }
}

/// A single message as carried by a [`Transport`](crate::Transport)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Text content, if this is a text frame
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}

/// An inbound frame after parsing, as delivered to message handlers
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Text frame that parsed as JSON
    Json(serde_json::Value),
    /// Text frame that was not valid JSON, unchanged
    Text(String),
    /// Binary frame, unchanged (never parsed)
    Binary(Vec<u8>),
}

impl Inbound {
    /// Parse a frame: JSON if possible, otherwise the raw text.
    ///
    /// A frame is never dropped for failing to parse.
    pub fn parse(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => match serde_json::from_str(&text) {
                Ok(value) => Inbound::Json(value),
                Err(_) => Inbound::Text(text),
            },
            Frame::Binary(bytes) => Inbound::Binary(bytes),
        }
    }

    /// The parsed JSON value, if any
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Inbound::Json(value) => Some(value),
            _ => None,
        }
    }
}
