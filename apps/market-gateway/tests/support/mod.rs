//! In-memory venue transports for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use market_gateway::application::ports::{
    Pairs, RestTransport, SocketEvent, SocketSession, SocketTransport, TransportError,
};
use market_gateway::{
    Gateway, GatewayConfig, GatewayResult, OandaCredentials, StreamSettings, VenueId,
    build_gateway_with,
};

// =============================================================================
// REST
// =============================================================================

/// One recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Call {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.param(key).and_then(|v| v.parse().ok())
    }

    pub fn limit(&self, key: &str) -> usize {
        self.param(key).and_then(|v| v.parse().ok()).unwrap()
    }
}

type Handler = Box<dyn Fn(&Call) -> Result<Value, TransportError> + Send + Sync>;

/// REST transport answering from per-path handlers and recording calls.
#[derive(Default)]
pub struct ScriptedRest {
    routes: Mutex<Vec<(String, Arc<Handler>)>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer requests whose path equals `path`.
    pub fn route<F>(&self, path: &str, handler: F)
    where
        F: Fn(&Call) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .push((path.to_string(), Arc::new(Box::new(handler))));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.path == path)
            .collect()
    }
}

#[async_trait]
impl RestTransport for ScriptedRest {
    async fn get(&self, path: &str, query: &Pairs, _headers: &Pairs) -> Result<Value, TransportError> {
        let call = Call {
            path: path.to_string(),
            query: query.to_vec(),
        };
        self.calls.lock().push(call.clone());
        let handler = self
            .routes
            .lock()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, h)| Arc::clone(h));
        match handler {
            Some(handler) => handler(&call),
            None => Err(TransportError::Status {
                status: 404,
                body: format!("no route for {path}"),
            }),
        }
    }

    async fn post(&self, path: &str, _body: &Value) -> Result<Value, TransportError> {
        Err(TransportError::Status {
            status: 405,
            body: path.to_string(),
        })
    }
}

// =============================================================================
// Sockets
// =============================================================================

/// The test side of one opened socket.
pub struct FakeSession {
    sent: mpsc::Receiver<String>,
    push: mpsc::Sender<SocketEvent>,
}

/// Socket transport handing out in-memory sessions.
#[derive(Default)]
pub struct FakeSockets {
    sessions: Mutex<Vec<FakeSession>>,
    opened: AtomicUsize,
    refuse: AtomicBool,
}

impl FakeSockets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Frames the gateway has sent on `session` since the last call.
    pub fn sent(&self, session: usize) -> Vec<String> {
        let mut sessions = self.sessions.lock();
        let mut frames = Vec::new();
        while let Ok(frame) = sessions[session].sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Sent frames parsed as JSON.
    pub fn sent_json(&self, session: usize) -> Vec<Value> {
        self.sent(session)
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Deliver a text frame to the gateway.
    pub async fn push(&self, session: usize, frame: &Value) {
        let tx = self.sessions.lock()[session].push.clone();
        tx.send(SocketEvent::Message(frame.to_string())).await.unwrap();
    }

    /// Simulate the venue dropping the socket.
    pub async fn drop_remote(&self, session: usize) {
        let tx = self.sessions.lock()[session].push.clone();
        tx.send(SocketEvent::Closed).await.unwrap();
    }

    /// Wait until `count` sockets have been opened.
    pub async fn wait_opened(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.opened() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("socket was not reopened");
    }
}

#[async_trait]
impl SocketTransport for FakeSockets {
    async fn open(&self, _url: &str) -> Result<SocketSession, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".to_string()));
        }
        let (outbound, sent) = mpsc::channel(1024);
        let (push, inbound) = mpsc::channel(1024);
        self.sessions.lock().push(FakeSession { sent, push });
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SocketSession { outbound, inbound })
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Config for one venue with test-friendly stream settings.
pub fn config_for(venue: VenueId) -> GatewayConfig {
    GatewayConfig {
        venues: vec![venue],
        oanda: Some(OandaCredentials::new(
            "test-token".to_string(),
            Some("101-001-1".to_string()),
        )),
        stream: StreamSettings {
            reconnect_delay: Duration::from_millis(10),
            reconnect_delay_max: Duration::from_millis(10),
            ..StreamSettings::default()
        },
        ..GatewayConfig::default()
    }
}

/// Gateway with one venue over scripted transports.
pub fn gateway(
    config: &GatewayConfig,
    rest: &Arc<ScriptedRest>,
    sockets: &Arc<FakeSockets>,
) -> GatewayResult<Gateway> {
    let rest = Arc::clone(rest);
    build_gateway_with(
        config,
        move |_| Ok(Arc::clone(&rest) as Arc<dyn RestTransport>),
        Arc::clone(sockets) as Arc<dyn SocketTransport>,
    )
}

// =============================================================================
// Candle history
// =============================================================================

/// `count` timestamps `step` apart, oldest first.
pub fn timeline(start: i64, step: i64, count: usize) -> Vec<i64> {
    (0..count as i64).map(|i| start + i * step).collect()
}

/// Newest `limit` timestamps at or before `end` (before, when `exclusive`).
pub fn window(available: &[i64], end: Option<i64>, limit: usize, exclusive: bool) -> Vec<i64> {
    let eligible: Vec<i64> = available
        .iter()
        .copied()
        .filter(|&ts| match end {
            Some(end) if exclusive => ts < end,
            Some(end) => ts <= end,
            None => true,
        })
        .collect();
    let skip = eligible.len().saturating_sub(limit);
    eligible[skip..].to_vec()
}

/// `[ts, o, h, l, c, v]` row with string cells.
pub fn kline(ts: i64) -> Value {
    serde_json::json!([ts, "100.0", "101.0", "99.0", "100.5", "12.5"])
}
