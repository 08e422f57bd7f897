//! A realtime session: the single owner of one connection and the
//! conversation state reduced from it.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use nargis_realtime::{
    ConnectionConfig, ConnectionStatus, Outbound, RealtimeConnection, Subscription,
    transport::validate_ws_url,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;

use crate::{
    conversation::{Applied, ChatMessage, ConversationMachine, ConversationSnapshot, Notice},
    error::{Error, Result},
    events::Incoming,
    sanitize::sanitize,
};

/// How long `start_listening` waits for the channel to open
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(4);

/// Sentinel asking the gateway to cancel the current turn
pub const STOP_SIGNAL: &str = "STOP";

/// Sentinel marking the end of a spoken utterance
pub const END_OF_STREAM_SIGNAL: &str = "EOS";

const NOTICE_CAPACITY: usize = 64;

/// Which backend pipeline handles voice input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    /// Plain conversational replies
    #[default]
    Chat,
    /// Tool-using agent
    Agent,
}

impl VoiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceMode::Chat => "chat",
            VoiceMode::Agent => "agent",
        }
    }

    /// Control frame that selects this mode on the gateway
    pub fn control_frame(&self) -> String {
        format!("MODE:{}", self.as_str())
    }
}

impl fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for VoiceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(VoiceMode::Chat),
            "agent" => Ok(VoiceMode::Agent),
            other => Err(format!("unknown voice mode '{other}' (expected chat or agent)")),
        }
    }
}

/// Structured messages the client sends to the gateway
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    /// A typed user message
    Text { content: &'a str },
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Initial voice mode
    pub mode: VoiceMode,
    /// Whether agent mode may be selected
    pub allow_agent_mode: bool,
    /// Readiness wait for `start_listening`
    pub open_timeout: Duration,
    /// History restored from a previous run
    pub history: Vec<ChatMessage>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: VoiceMode::Chat,
            allow_agent_mode: false,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            history: Vec::new(),
        }
    }
}

/// State reachable from connection handlers
struct Inner {
    machine: Mutex<ConversationMachine>,
    snapshot_tx: watch::Sender<ConversationSnapshot>,
    notices_tx: broadcast::Sender<Notice>,
}

impl Inner {
    /// Reduce one event, publish the new snapshot, then fan out notices
    fn handle(&self, incoming: Incoming) -> Applied {
        let applied = {
            let mut machine = self.machine.lock();
            let applied = machine.apply(incoming);
            if applied.is_accepted() {
                self.snapshot_tx.send_replace(machine.snapshot());
            }
            applied
        };
        for notice in &applied.notices {
            // No receivers is fine
            let _ = self.notices_tx.send(notice.clone());
        }
        applied
    }

    /// Mutate the machine directly and publish the result
    fn update<R>(&self, f: impl FnOnce(&mut ConversationMachine) -> R) -> R {
        let mut machine = self.machine.lock();
        let result = f(&mut machine);
        self.snapshot_tx.send_replace(machine.snapshot());
        result
    }
}

/// Voice/text session over one realtime connection.
///
/// Owns the connection exclusively. Inbound frames are classified and
/// reduced into a [`ConversationMachine`]; callers observe the result
/// through [`subscribe`](Self::subscribe) and [`notices`](Self::notices).
pub struct RealtimeSession {
    connection: RealtimeConnection,
    inner: Arc<Inner>,
    mode: Mutex<VoiceMode>,
    allow_agent_mode: bool,
    open_timeout: Duration,
    subscriptions: Vec<Subscription>,
}

impl RealtimeSession {
    /// Take ownership of `connection`, attach handlers, and start it
    pub fn new(connection: RealtimeConnection, config: SessionConfig) -> Result<Self> {
        if config.mode == VoiceMode::Agent && !config.allow_agent_mode {
            return Err(Error::AgentModeUnavailable);
        }

        let machine = ConversationMachine::with_history(config.history);
        let (snapshot_tx, _) = watch::channel(machine.snapshot());
        let (notices_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let inner = Arc::new(Inner {
            machine: Mutex::new(machine),
            snapshot_tx,
            notices_tx,
        });

        let handler_inner = Arc::clone(&inner);
        let on_message = connection.on_message(move |inbound| {
            handler_inner.handle(Incoming::from_inbound(inbound));
        });
        let url = connection.url().to_string();
        let on_status = connection.on_status(move |status| match status {
            ConnectionStatus::Error => tracing::warn!("Realtime channel error ({})", url),
            other => tracing::debug!("Realtime channel {} ({})", other, url),
        });
        connection.start();

        Ok(Self {
            connection,
            inner,
            mode: Mutex::new(config.mode),
            allow_agent_mode: config.allow_agent_mode,
            open_timeout: config.open_timeout,
            subscriptions: vec![on_message, on_status],
        })
    }

    /// Connect over WebSocket
    pub fn websocket(connection: ConnectionConfig, config: SessionConfig) -> Result<Self> {
        validate_ws_url(&connection.url)?;
        Self::new(RealtimeConnection::websocket(connection), config)
    }

    /// Begin a new spoken turn: reset turn state, wait for the channel,
    /// then announce the voice mode.
    pub async fn start_listening(&self) -> Result<()> {
        self.inner.update(ConversationMachine::reset_turn);
        if !self.connection.wait_for_open(self.open_timeout).await {
            tracing::warn!("Realtime channel not open after {:?}", self.open_timeout);
            return Err(Error::NotConnected(self.open_timeout));
        }
        let mode = self.voice_mode();
        tracing::debug!("Listening in {} mode", mode);
        self.connection.send(mode.control_frame());
        Ok(())
    }

    /// Stream one chunk of recorded audio
    pub fn send_audio(&self, chunk: impl Into<Vec<u8>>) {
        self.connection.send(Outbound::Binary(chunk.into()));
    }

    /// Mark the end of the spoken utterance
    pub fn end_utterance(&self) {
        self.connection.send(END_OF_STREAM_SIGNAL);
    }

    /// Ask the gateway to cancel the current turn. The turn closes when
    /// the resulting `end` event arrives.
    pub fn stop(&self) {
        self.connection.send(STOP_SIGNAL);
    }

    /// Send a typed message as a new turn
    pub fn send_text(&self, text: &str) -> Result<()> {
        let text = sanitize(text);
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }
        let payload = Outbound::json(&ClientMessage::Text { content: text })
            .map_err(nargis_realtime::Error::from)?;
        self.inner.update(|machine| {
            machine.reset_turn();
            machine.push_user_message(text);
        });
        self.connection.send(payload);
        Ok(())
    }

    /// Switch voice mode for subsequent `start_listening` calls
    pub fn set_voice_mode(&self, mode: VoiceMode) -> Result<()> {
        if mode == VoiceMode::Agent && !self.allow_agent_mode {
            return Err(Error::AgentModeUnavailable);
        }
        *self.mode.lock() = mode;
        Ok(())
    }

    pub fn voice_mode(&self) -> VoiceMode {
        *self.mode.lock()
    }

    pub fn allows_agent_mode(&self) -> bool {
        self.allow_agent_mode
    }

    /// Drop all history
    pub fn clear_messages(&self) {
        self.inner.update(ConversationMachine::clear_messages);
    }

    /// Current conversation state
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Watch channel updated on every accepted event
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Snapshot updates as a `Stream`, starting with the current state
    pub fn snapshots(&self) -> WatchStream<ConversationSnapshot> {
        WatchStream::new(self.subscribe())
    }

    /// Errors, cancellations and tool completions
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices_tx.subscribe()
    }

    /// Wait until the current turn ends or reports an error
    pub async fn wait_for_turn_end(&self, timeout: Duration) -> Result<ConversationSnapshot> {
        let mut rx = self.subscribe();
        let ended = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| s.sealed || s.last_error.is_some())
                .await
                .map(|snapshot| snapshot.clone())
        })
        .await;
        match ended {
            Ok(Ok(snapshot)) => Ok(snapshot),
            _ => Err(Error::TurnTimeout(timeout)),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn status_updates(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.status_updates()
    }

    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Close the connection permanently and detach handlers
    pub fn close(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.connection.close();
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Feed a frame through the same path as frames from the wire
    #[cfg(any(test, feature = "testing"))]
    pub fn simulate_incoming(&self, inbound: nargis_realtime::Inbound) -> Applied {
        self.inner.handle(Incoming::from_inbound(&inbound))
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.close();
    }
}
