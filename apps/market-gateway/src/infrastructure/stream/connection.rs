//! Persistent Stream Connection
//!
//! One long-lived socket per venue. The connection owns a supervisor task
//! that reads inbound frames from the transport's channel, hands them to
//! registered handlers, and re-opens the socket after an unexpected close.
//!
//! # States
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─open─► Connected
//!      ▲                                          │ socket closed
//!      └──── Reconnecting ◄── Disconnected ◄──────┘
//!
//! close() from any state ─► Closed (terminal)
//! ```
//!
//! Outbound messages are sent only while `Connected`; anything sent in
//! another state is dropped. Re-subscribing after a reconnect is the
//! caller's business (see the `Opened { reconnect: true }` event).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{SocketEvent, SocketTransport, TransportError};
use crate::domain::venue::VenueId;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Stream connection failures surfaced to callers.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    /// The socket could not be opened.
    #[error("stream handshake failed: {0}")]
    Handshake(TransportError),

    /// The connection was closed with `close()`.
    #[error("stream connection is closed")]
    Closed,

    /// The venue has no stream endpoint configured.
    #[error("no stream endpoint configured")]
    NoEndpoint,
}

// =============================================================================
// State & Events
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting out the reconnect delay.
    Reconnecting,
    /// Closed by the owner; terminal.
    Closed,
}

impl ConnectionState {
    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
            Self::Closed => 4,
        }
    }

    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

/// Event delivered to connection handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Socket opened; `reconnect` is false for the first open.
    Opened {
        /// Opened by the supervisor after a drop.
        reconnect: bool,
    },
    /// Inbound JSON frame.
    Message(Value),
    /// Socket closed unexpectedly.
    Closed,
}

impl ConnectionEvent {
    /// Handler category for this event.
    #[must_use]
    pub const fn kind(&self) -> ConnectionEventKind {
        match self {
            Self::Opened { .. } => ConnectionEventKind::Opened,
            Self::Message(_) => ConnectionEventKind::Message,
            Self::Closed => ConnectionEventKind::Closed,
        }
    }
}

/// Handler categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    /// [`ConnectionEvent::Opened`].
    Opened,
    /// [`ConnectionEvent::Message`].
    Message,
    /// [`ConnectionEvent::Closed`].
    Closed,
}

/// Connection event handler.
pub type ConnectionHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

// =============================================================================
// Configuration
// =============================================================================

/// Application-level keepalive sent while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// Time between keepalives.
    pub interval: Duration,
    /// Text frame to send.
    pub message: String,
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Socket URL.
    pub url: String,
    /// Reconnect timing.
    pub reconnect: ReconnectConfig,
    /// Optional keepalive.
    pub heartbeat: Option<Heartbeat>,
}

impl ConnectionConfig {
    /// Default reconnect policy, no heartbeat.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: None,
        }
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set a keepalive.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Option<Heartbeat>) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

// =============================================================================
// Persistent Connection
// =============================================================================

/// Self-healing socket with ordered event handlers.
pub struct PersistentConnection {
    venue: VenueId,
    config: ConnectionConfig,
    transport: Arc<dyn SocketTransport>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    handlers: RwLock<Vec<(ConnectionEventKind, ConnectionHandler)>>,
    connect_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl fmt::Debug for PersistentConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentConnection")
            .field("venue", &self.venue)
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PersistentConnection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(venue: VenueId, config: ConnectionConfig, transport: Arc<dyn SocketTransport>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            venue,
            config,
            transport,
            state,
            outbound: Mutex::new(None),
            handlers: RwLock::new(Vec::new()),
            connect_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Register a handler. Handlers of one kind run in registration order.
    pub fn on<F>(&self, kind: ConnectionEventKind, handler: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push((kind, Arc::new(handler)));
    }

    /// Open the socket and start the supervisor.
    ///
    /// Returns once the socket is open. Calling it while connected, or
    /// while the supervisor is reconnecting, is a no-op.
    ///
    /// # Errors
    ///
    /// [`StreamError::Handshake`] if the socket cannot be opened,
    /// [`StreamError::Closed`] after [`Self::close`].
    pub async fn connect(self: &Arc<Self>) -> Result<(), StreamError> {
        let _serialized = self.connect_lock.lock().await;
        if self.cancel.is_cancelled() {
            return Err(StreamError::Closed);
        }
        if self.state() != ConnectionState::Disconnected {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        info!(venue = %self.venue, url = %self.config.url, "Connecting to venue stream");

        let session = match self.transport.open(&self.config.url).await {
            Ok(session) => session,
            Err(e) => {
                warn!(venue = %self.venue, error = %e, "Stream handshake failed");
                self.set_state(ConnectionState::Disconnected);
                return Err(StreamError::Handshake(e));
            }
        };
        if self.cancel.is_cancelled() {
            return Err(StreamError::Closed);
        }

        *self.outbound.lock() = Some(session.outbound);
        self.set_state(ConnectionState::Connected);
        self.emit(&ConnectionEvent::Opened { reconnect: false });

        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise(session.inbound).await });
        Ok(())
    }

    /// Send a text frame.
    ///
    /// Returns `false` (and drops the message) unless connected.
    pub fn send(&self, message: impl Into<String>) -> bool {
        if self.state() != ConnectionState::Connected {
            debug!(venue = %self.venue, "Dropping outbound frame while not connected");
            return false;
        }
        let guard = self.outbound.lock();
        guard
            .as_ref()
            .is_some_and(|tx| tx.try_send(message.into()).is_ok())
    }

    /// Close for good. Idempotent; cancels any pending reconnect.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.outbound.lock().take();
        self.set_state(ConnectionState::Closed);
        info!(venue = %self.venue, "Stream connection closed");
    }

    /// Whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -------------------------------------------------------------------------
    // Supervisor
    // -------------------------------------------------------------------------

    async fn supervise(self: Arc<Self>, mut inbound: mpsc::Receiver<SocketEvent>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            self.pump(&mut inbound).await;
            self.outbound.lock().take();
            if self.cancel.is_cancelled() {
                break;
            }

            warn!(venue = %self.venue, "Stream closed unexpectedly");
            self.set_state(ConnectionState::Disconnected);
            self.emit(&ConnectionEvent::Closed);

            match self.reopen(&mut policy).await {
                Some(next) => inbound = next,
                None => break,
            }
        }

        debug!(venue = %self.venue, state = self.state().as_str(), "Stream supervisor stopped");
    }

    /// Deliver inbound frames until the socket goes away or the connection
    /// is closed.
    async fn pump(&self, inbound: &mut mpsc::Receiver<SocketEvent>) {
        let mut heartbeat = self.config.heartbeat.as_ref().map(|hb| {
            let mut interval = tokio::time::interval_at(Instant::now() + hb.interval, hb.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = next_tick(heartbeat.as_mut()) => {
                    if let Some(hb) = &self.config.heartbeat {
                        self.send(hb.message.clone());
                    }
                }
                event = inbound.recv() => match event {
                    Some(SocketEvent::Message(text)) => self.handle_text(&text),
                    Some(SocketEvent::Error(reason)) => {
                        warn!(venue = %self.venue, error = %reason, "Stream transport error");
                        return;
                    }
                    Some(SocketEvent::Closed) | None => return,
                },
            }
        }
    }

    async fn reopen(&self, policy: &mut ReconnectPolicy) -> Option<mpsc::Receiver<SocketEvent>> {
        loop {
            let Some(delay) = policy.next_delay() else {
                warn!(
                    venue = %self.venue,
                    attempts = policy.attempt_count(),
                    "Giving up on stream after maximum reconnect attempts"
                );
                self.set_state(ConnectionState::Disconnected);
                return None;
            };

            self.set_state(ConnectionState::Reconnecting);
            info!(
                venue = %self.venue,
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to venue stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            self.set_state(ConnectionState::Connecting);
            metrics::record_reconnect(self.venue);

            let opened = tokio::select! {
                () = self.cancel.cancelled() => return None,
                result = self.transport.open(&self.config.url) => result,
            };

            match opened {
                Ok(session) => {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    *self.outbound.lock() = Some(session.outbound);
                    self.set_state(ConnectionState::Connected);
                    policy.reset();
                    info!(venue = %self.venue, "Stream reconnected");
                    self.emit(&ConnectionEvent::Opened { reconnect: true });
                    return Some(session.inbound);
                }
                Err(e) => {
                    warn!(venue = %self.venue, error = %e, "Stream reconnect failed");
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        metrics::record_stream_frame(self.venue);
        match serde_json::from_str::<Value>(text) {
            Ok(frame) => self.emit(&ConnectionEvent::Message(frame)),
            Err(_) => debug!(venue = %self.venue, frame = %text, "Ignoring non-JSON frame"),
        }
    }

    fn emit(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let handlers: Vec<ConnectionHandler> = self
            .handlers
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            metrics::set_connection_state(self.venue, next.code());
            debug!(venue = %self.venue, state = next.as_str(), "Stream state changed");
        }
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::SocketSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Remote ends of sockets handed out by [`FakeSockets`].
    struct Remote {
        to_client: mpsc::Sender<SocketEvent>,
        from_client: mpsc::Receiver<String>,
    }

    #[derive(Default)]
    struct FakeSockets {
        opens: AtomicUsize,
        fail_first: usize,
        remotes: Mutex<Vec<Remote>>,
    }

    impl FakeSockets {
        fn failing_first(n: usize) -> Self {
            Self {
                fail_first: n,
                ..Self::default()
            }
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        fn remote(&self, index: usize) -> (mpsc::Sender<SocketEvent>, Vec<String>) {
            let mut remotes = self.remotes.lock();
            let remote = &mut remotes[index];
            let mut sent = Vec::new();
            while let Ok(text) = remote.from_client.try_recv() {
                sent.push(text);
            }
            (remote.to_client.clone(), sent)
        }
    }

    #[async_trait]
    impl SocketTransport for FakeSockets {
        async fn open(&self, _url: &str) -> Result<SocketSession, TransportError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(TransportError::Network("refused".into()));
            }
            let (out_tx, out_rx) = mpsc::channel(64);
            let (in_tx, in_rx) = mpsc::channel(64);
            self.remotes.lock().push(Remote {
                to_client: in_tx,
                from_client: out_rx,
            });
            Ok(SocketSession {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    fn connection(sockets: &Arc<FakeSockets>) -> Arc<PersistentConnection> {
        Arc::new(PersistentConnection::new(
            VenueId::Bybit,
            ConnectionConfig::new("wss://example.invalid/ws"),
            Arc::clone(sockets) as Arc<dyn SocketTransport>,
        ))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_opens_and_sends() {
        let sockets = Arc::new(FakeSockets::default());
        let conn = connection(&sockets);

        assert!(!conn.send("early"));
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.send(r#"{"op":"ping"}"#));

        let (_, sent) = sockets.remote(0);
        assert_eq!(sent, vec![r#"{"op":"ping"}"#.to_string()]);
    }

    #[tokio::test]
    async fn handshake_failure_rejects_connect() {
        let sockets = Arc::new(FakeSockets::failing_first(1));
        let conn = connection(&sockets);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, StreamError::Handshake(TransportError::Network(_))));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let sockets = Arc::new(FakeSockets::default());
        let conn = connection(&sockets);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            conn.on(ConnectionEventKind::Message, move |event| {
                if let ConnectionEvent::Message(frame) = event {
                    seen.lock().push(format!("{label}:{}", frame["n"]));
                }
            });
        }

        conn.connect().await.unwrap();
        let (remote, _) = sockets.remote(0);
        remote.send(SocketEvent::Message(r#"{"n":1}"#.into())).await.unwrap();
        remote.send(SocketEvent::Message("pong".into())).await.unwrap();
        remote.send(SocketEvent::Message(r#"{"n":2}"#.into())).await.unwrap();
        settle().await;

        assert_eq!(
            *seen.lock(),
            vec!["first:1", "second:1", "first:2", "second:2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_after_delay() {
        let sockets = Arc::new(FakeSockets::default());
        let conn = connection(&sockets);
        let reopened = Arc::new(AtomicUsize::new(0));
        {
            let reopened = Arc::clone(&reopened);
            conn.on(ConnectionEventKind::Opened, move |event| {
                if matches!(event, ConnectionEvent::Opened { reconnect: true }) {
                    reopened.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        conn.connect().await.unwrap();

        let (remote, _) = sockets.remote(0);
        remote.send(SocketEvent::Closed).await.unwrap();
        settle().await;
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert!(!conn.send("dropped"));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(sockets.opens(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(sockets.opens(), 2);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(reopened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_stops_reconnects() {
        let sockets = Arc::new(FakeSockets::default());
        let conn = connection(&sockets);
        conn.connect().await.unwrap();

        let (remote, _) = sockets.remote(0);
        remote.send(SocketEvent::Error("reset".into())).await.unwrap();
        settle().await;
        assert_eq!(conn.state(), ConnectionState::Reconnecting);

        conn.close();
        conn.close();
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(sockets.opens(), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.send("late"));
        assert_eq!(conn.connect().await.unwrap_err(), StreamError::Closed);
    }

    #[tokio::test]
    async fn close_before_connect_is_harmless() {
        let sockets = Arc::new(FakeSockets::default());
        let conn = connection(&sockets);
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(sockets.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_is_sent_while_connected() {
        let sockets = Arc::new(FakeSockets::default());
        let conn = Arc::new(PersistentConnection::new(
            VenueId::Okx,
            ConnectionConfig::new("wss://example.invalid").with_heartbeat(Some(Heartbeat {
                interval: Duration::from_secs(20),
                message: "ping".into(),
            })),
            Arc::clone(&sockets) as Arc<dyn SocketTransport>,
        ));
        conn.connect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(41)).await;
        settle().await;

        let (_, sent) = sockets.remote(0);
        assert_eq!(sent, vec!["ping".to_string(), "ping".to_string()]);
    }

    #[tokio::test]
    async fn state_changes_are_observable() {
        let sockets = Arc::new(FakeSockets::default());
        let conn = connection(&sockets);
        let mut states = conn.watch_state();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

        conn.connect().await.unwrap();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);
    }
}
