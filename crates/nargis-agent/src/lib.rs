//! nargis-agent: conversation state over the realtime channel
//!
//! This crate classifies inbound frames into agent events, reduces them into
//! a turn-based conversation, and provides the session that owns a
//! connection on behalf of the UI.

pub mod conversation;
pub mod error;
pub mod events;
pub mod sanitize;
pub mod session;

pub use conversation::{
    Applied, ChatMessage, ConversationMachine, ConversationSnapshot, Disposition, Notice, Role,
    TurnState,
};
pub use error::{Error, Result};
pub use events::{AgentEvent, Incoming};
pub use sanitize::{SanitizeOptions, sanitize_text};
pub use session::{RealtimeSession, SessionConfig, VoiceMode};
