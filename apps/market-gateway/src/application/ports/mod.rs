//! Port Interfaces
//!
//! Transport contracts the venue adapters are written against. Production
//! adapters live in `infrastructure::http` (reqwest) and
//! `infrastructure::stream::websocket` (tokio-tungstenite); tests supply
//! in-memory implementations.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RestTransport`: JSON over HTTP with a fixed timeout
//! - `SocketTransport`: opens a bidirectional text socket

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

// =============================================================================
// Errors
// =============================================================================

/// Transport-level failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS or TLS failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// Body was not valid JSON.
    #[error("decode error: {0}")]
    Decode(String),
}

// =============================================================================
// REST
// =============================================================================

/// Query string or header pairs.
pub type Pairs = [(String, String)];

/// JSON-over-HTTP transport rooted at a venue's REST base URL.
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// `GET base_url + path` with query parameters and extra headers.
    async fn get(&self, path: &str, query: &Pairs, headers: &Pairs)
    -> Result<Value, TransportError>;

    /// `POST base_url + path` with a JSON body.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, TransportError>;
}

// =============================================================================
// Sockets
// =============================================================================

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Text frame.
    Message(String),
    /// Transport error; the socket is closing.
    Error(String),
    /// Socket closed.
    Closed,
}

/// An open socket, split into its two directions.
///
/// Dropping `outbound` closes the socket. `inbound` ends (or yields
/// [`SocketEvent::Closed`]) when the remote side goes away.
#[derive(Debug)]
pub struct SocketSession {
    /// Text frames to send.
    pub outbound: mpsc::Sender<String>,
    /// Frames and lifecycle events received.
    pub inbound: mpsc::Receiver<SocketEvent>,
}

/// Opens sockets.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Open a socket to `url`, resolving once the handshake completes.
    async fn open(&self, url: &str) -> Result<SocketSession, TransportError>;
}
