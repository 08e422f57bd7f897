//! In-memory connector for driving a [`RealtimeConnection`] without a network.
//!
//! Each connect attempt produces a [`MockSocket`] that the test controls:
//! it decides when (or whether) the attempt opens, injects inbound frames,
//! and inspects what was sent.
//!
//! [`RealtimeConnection`]: crate::RealtimeConnection

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite;

use crate::{
    error::{Error, Result},
    frame::Frame,
    transport::{Connector, Transport},
};

struct Inner {
    attempts: AtomicUsize,
    auto_open: AtomicBool,
    refuse_all: AtomicBool,
    sockets_tx: mpsc::UnboundedSender<MockSocket>,
    sockets_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockSocket>>,
}

/// Connector whose attempts are resolved by the test
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (sockets_tx, sockets_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                attempts: AtomicUsize::new(0),
                auto_open: AtomicBool::new(false),
                refuse_all: AtomicBool::new(false),
                sockets_tx,
                sockets_rx: tokio::sync::Mutex::new(sockets_rx),
            }),
        }
    }

    /// Open every attempt immediately instead of waiting for [`MockSocket::open`]
    pub fn auto_open(&self, enabled: bool) {
        self.inner.auto_open.store(enabled, Ordering::SeqCst);
    }

    /// Fail every attempt immediately
    pub fn refuse_all(&self, enabled: bool) {
        self.inner.refuse_all.store(enabled, Ordering::SeqCst);
    }

    /// Number of connect attempts so far
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Socket for the next attempt, in attempt order
    pub async fn next_socket(&self) -> Option<MockSocket> {
        self.inner.sockets_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse_all.load(Ordering::SeqCst) {
            return Err(Error::Refused(format!("{url} refused (mock)")));
        }

        let (open_tx, open_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let socket = MockSocket {
            url: url.to_string(),
            open_tx: Arc::new(Mutex::new(Some(open_tx))),
            events_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let transport = MockTransport {
            events_rx,
            sent: Arc::clone(&socket.sent),
            closed: Arc::clone(&socket.closed),
            ended: false,
        };
        let _ = self.inner.sockets_tx.send(socket);

        if !self.inner.auto_open.load(Ordering::SeqCst) {
            match open_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::Refused("mock socket dropped".into())),
            }
        }
        Ok(Box::new(transport))
    }
}

enum Event {
    Frame(Frame),
    Fail(String),
    Disconnect,
}

/// Test-side handle to one connect attempt
#[derive(Clone)]
pub struct MockSocket {
    url: String,
    open_tx: Arc<Mutex<Option<oneshot::Sender<Result<()>>>>>,
    events_tx: mpsc::UnboundedSender<Event>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
}

impl MockSocket {
    /// Complete the attempt successfully
    pub fn open(&self) {
        if let Some(tx) = self.open_tx.lock().take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Fail the attempt before it opens
    pub fn refuse(&self) {
        if let Some(tx) = self.open_tx.lock().take() {
            let _ = tx.send(Err(Error::Refused(format!("{} refused (mock)", self.url))));
        }
    }

    /// Deliver a text frame from the peer
    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Frame::Text(text.into()));
    }

    /// Deliver any frame from the peer
    pub fn push(&self, frame: Frame) {
        let _ = self.events_tx.send(Event::Frame(frame));
    }

    /// Break the open transport with an I/O error
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.events_tx.send(Event::Fail(reason.into()));
    }

    /// Close from the peer side
    pub fn disconnect(&self) {
        let _ = self.events_tx.send(Event::Disconnect);
    }

    /// Every frame the connection transmitted, in order
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Text frames the connection transmitted, in order
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| frame.as_text().map(str::to_string))
            .collect()
    }

    /// Whether the connection closed this transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

struct MockTransport {
    events_rx: mpsc::UnboundedReceiver<Event>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
    ended: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.ended || self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        if self.ended {
            return None;
        }
        match self.events_rx.recv().await {
            Some(Event::Frame(frame)) => Some(Ok(frame)),
            Some(Event::Fail(reason)) => {
                self.ended = true;
                let io = io::Error::new(io::ErrorKind::ConnectionReset, reason);
                Some(Err(Error::WebSocket(tungstenite::Error::Io(io))))
            }
            Some(Event::Disconnect) | None => {
                self.ended = true;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_open_connects_immediately() {
        let connector = MockConnector::new();
        connector.auto_open(true);
        let mut transport = connector.connect("ws://mock").await.unwrap();
        let socket = connector.next_socket().await.unwrap();
        assert_eq!(socket.url(), "ws://mock");

        transport.send(Frame::Text("hi".into())).await.unwrap();
        assert_eq!(socket.sent_text(), vec!["hi"]);

        socket.push_text("back");
        assert_eq!(transport.recv().await.unwrap().unwrap(), Frame::Text("back".into()));

        socket.disconnect();
        assert!(transport.recv().await.is_none());
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_refuse_all_counts_attempts() {
        let connector = MockConnector::new();
        connector.refuse_all(true);
        assert!(connector.connect("ws://mock").await.is_err());
        assert!(connector.connect("ws://mock").await.is_err());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_close_marks_socket() {
        let connector = MockConnector::new();
        connector.auto_open(true);
        let mut transport = connector.connect("ws://mock").await.unwrap();
        let socket = connector.next_socket().await.unwrap();
        transport.close().await.unwrap();
        assert!(socket.is_closed());
        assert!(matches!(
            transport.send(Frame::Text("late".into())).await,
            Err(Error::Closed)
        ));
    }
}
