//! Connection manager: one logical channel carried by successive transports

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    frame::{Frame, Inbound, Outbound},
    handlers::{HandlerSet, Subscription},
    transport::{Connector, RetryConfig, Transport, WsConnector},
};

/// Default bound on messages held while the channel is not open
pub const DEFAULT_MAX_QUEUED: usize = 64;

/// Status of the logical connection, reported on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not started yet
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
    /// A reconnect attempt is scheduled
    Retrying,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Retrying => "retrying",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint, fixed for the lifetime of the connection
    pub url: String,
    /// Reconnect policy
    pub retry: RetryConfig,
    /// Maximum messages held while not open; overflow is dropped
    pub max_queued: usize,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry: RetryConfig::default(),
            max_queued: DEFAULT_MAX_QUEUED,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_queued(mut self, max_queued: usize) -> Self {
        self.max_queued = max_queued;
        self
    }
}

enum Command {
    Send(Outbound),
    Close,
}

/// State shared between the public handle and the driver task
struct Shared {
    status_tx: watch::Sender<ConnectionStatus>,
    message_handlers: HandlerSet<Inbound>,
    status_handlers: HandlerSet<ConnectionStatus>,
    closed_by_user: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
        self.status_handlers.dispatch(&status);
    }

    fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    fn deliver(&self, frame: Frame) {
        let inbound = Inbound::parse(frame);
        self.message_handlers.dispatch(&inbound);
    }
}

/// A single logical realtime connection.
///
/// Owns its transport exclusively; callers only see handlers and status.
/// Sends issued before the channel is open are queued and flushed in order
/// on open. Unexpected closes are retried with exponential backoff until
/// [`RetryConfig::max_retries`] consecutive failures, after which the manager
/// goes quiet. Handlers stay attached across reconnects.
pub struct RealtimeConnection {
    url: String,
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    pending: Mutex<Option<Driver>>,
}

impl RealtimeConnection {
    /// Create a connection that will use `connector` for every attempt.
    /// Nothing happens on the network until [`start`](Self::start).
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);
        let shared = Arc::new(Shared {
            status_tx,
            message_handlers: HandlerSet::new(),
            status_handlers: HandlerSet::new(),
            closed_by_user: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        let driver = Driver {
            connector,
            url: config.url.clone(),
            retry: config.retry,
            max_queued: config.max_queued,
            cmd_rx,
            shared: Arc::clone(&shared),
            queue: VecDeque::new(),
            attempts: 0,
        };
        Self {
            url: config.url,
            shared,
            cmd_tx,
            pending: Mutex::new(Some(driver)),
        }
    }

    /// Create a connection over WebSocket
    pub fn websocket(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(WsConnector))
    }

    /// Spawn the driver task and begin connecting. Later calls are no-ops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        // Checked under the lock so a concurrent close either sees the
        // driver still pending or finds it already handed to a running task
        let driver = {
            let mut pending = self.pending.lock();
            if self.is_closed() {
                return;
            }
            pending.take()
        };
        if let Some(driver) = driver {
            tokio::spawn(driver.run());
        }
    }

    /// Queue or transmit a message. Never fails; transport problems show up
    /// only as status events.
    pub fn send(&self, message: impl Into<Outbound>) {
        if self.is_closed() {
            tracing::debug!("Dropping outbound message: connection closed by user");
            return;
        }
        if self.cmd_tx.send(Command::Send(message.into())).is_err() {
            tracing::debug!("Dropping outbound message: connection driver has stopped");
        }
    }

    /// Register a handler for every inbound frame, in arrival order
    pub fn on_message(&self, handler: impl Fn(&Inbound) + Send + Sync + 'static) -> Subscription {
        self.shared.message_handlers.add(handler)
    }

    /// Register a handler for every status transition
    pub fn on_status(
        &self,
        handler: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.status_handlers.add(handler)
    }

    /// Most recently reported status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Watch channel that tracks the latest status
    pub fn status_updates(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Wait until the connection reports `open`, or `timeout` elapses.
    /// Returns whether it opened.
    pub async fn wait_for_open(&self, timeout: Duration) -> bool {
        if self.status().is_open() {
            return true;
        }

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = self.on_status(move |status| {
            if status.is_open() {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        });

        // The status may have flipped between the first check and subscribing
        let opened = self.status().is_open()
            || matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())));
        subscription.unsubscribe();
        opened
    }

    /// Close permanently: cancels any scheduled retry, closes the transport,
    /// and disables reconnects. Idempotent.
    pub fn close(&self) {
        if self.shared.closed_by_user.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Closing realtime connection to {}", self.url);
        self.shared.cancel.cancel();

        if self.pending.lock().take().is_some() {
            // Never started; there is no driver to report the close
            self.shared.set_status(ConnectionStatus::Closed);
            return;
        }
        let _ = self.cmd_tx.send(Command::Close);
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed_by_user.load(Ordering::Acquire)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConnection")
            .field("url", &self.url)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum Attempt {
    Open(Box<dyn Transport>),
    Failed(crate::Error),
    Cancelled,
}

enum Ended {
    ByUser,
    ByPeer,
}

/// Background task that owns the transport and the pre-open queue
struct Driver {
    connector: Arc<dyn Connector>,
    url: String,
    retry: RetryConfig,
    max_queued: usize,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    queue: VecDeque<Outbound>,
    /// Consecutive failed attempts since the last successful open
    attempts: u32,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.shared.set_status(ConnectionStatus::Connecting);

            match self.connect().await {
                Attempt::Open(transport) => {
                    self.attempts = 0;
                    tracing::info!("Realtime connection open: {}", self.url);
                    self.shared.set_status(ConnectionStatus::Open);
                    let ended = self.pump(transport).await;
                    self.shared.set_status(ConnectionStatus::Closed);
                    if matches!(ended, Ended::ByUser) {
                        return;
                    }
                }
                Attempt::Failed(e) => {
                    if e.is_connect_failure() {
                        tracing::warn!("Could not reach {}: {}", self.url, e);
                    } else {
                        tracing::warn!("Connection to {} failed: {}", self.url, e);
                    }
                    self.shared.set_status(ConnectionStatus::Error);
                    self.shared.set_status(ConnectionStatus::Closed);
                }
                Attempt::Cancelled => {
                    self.shared.set_status(ConnectionStatus::Closed);
                    return;
                }
            }

            if self.shared.closed_by_user.load(Ordering::Acquire) || !self.backoff().await {
                self.finish();
                return;
            }
        }
    }

    /// Wait for the connector, queueing sends that arrive meanwhile
    async fn connect(&mut self) -> Attempt {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connecting = connector.connect(&url);
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(transport) => Attempt::Open(transport),
                        Err(e) => Attempt::Failed(e),
                    };
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(message)) => self.enqueue(message),
                    Some(Command::Close) | None => return Attempt::Cancelled,
                },
            }
        }
    }

    /// Flush the queue, then shuttle commands and frames until the transport ends
    async fn pump(&mut self, mut transport: Box<dyn Transport>) -> Ended {
        if !self.queue.is_empty() {
            tracing::debug!("Flushing {} queued message(s)", self.queue.len());
        }
        while let Some(message) = self.queue.pop_front() {
            transmit(&self.shared, transport.as_mut(), message).await;
        }

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(message)) => {
                        transmit(&self.shared, transport.as_mut(), message).await;
                    }
                    Some(Command::Close) | None => {
                        if let Err(e) = transport.close().await {
                            tracing::debug!("Error closing transport: {}", e);
                        }
                        return Ended::ByUser;
                    }
                },
                frame = transport.recv() => match frame {
                    Some(Ok(frame)) => self.shared.deliver(frame),
                    Some(Err(e)) => {
                        tracing::warn!("Transport error on {}: {}", self.url, e);
                        self.shared.set_status(ConnectionStatus::Error);
                        let _ = transport.close().await;
                        return Ended::ByPeer;
                    }
                    None => {
                        tracing::info!("Realtime connection closed by peer: {}", self.url);
                        return Ended::ByPeer;
                    }
                },
            }
        }
    }

    /// Sleep before the next attempt. Returns false when retries are
    /// exhausted or the user closed the connection meanwhile.
    async fn backoff(&mut self) -> bool {
        if self.attempts >= self.retry.max_retries {
            tracing::warn!(
                "Giving up on {} after {} reconnect attempt(s)",
                self.url,
                self.attempts
            );
            return false;
        }
        self.attempts += 1;
        let delay = self.retry.delay_for_attempt(self.attempts);
        self.shared.set_status(ConnectionStatus::Retrying);
        tracing::warn!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            self.url,
            delay,
            self.attempts,
            self.retry.max_retries
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = self.shared.cancel.cancelled() => return false,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(message)) => self.enqueue(message),
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    fn enqueue(&mut self, message: Outbound) {
        if self.queue.len() >= self.max_queued {
            tracing::warn!(
                "Send queue full ({} messages), dropping message",
                self.max_queued
            );
            return;
        }
        self.queue.push_back(message);
    }

    /// Report a final `closed` if the user tore down mid-backoff
    fn finish(&self) {
        if self.shared.closed_by_user.load(Ordering::Acquire)
            && self.shared.status() != ConnectionStatus::Closed
        {
            self.shared.set_status(ConnectionStatus::Closed);
        }
    }
}

async fn transmit(shared: &Shared, transport: &mut dyn Transport, message: Outbound) {
    if let Err(e) = transport.send(message.into_frame()).await {
        tracing::warn!("Send failed: {}", e);
        shared.set_status(ConnectionStatus::Error);
    }
}
