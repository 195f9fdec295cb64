//! Venue stream plumbing: reconnect policy, persistent connection and the
//! WebSocket transport.

/// Self-healing socket with ordered handlers.
pub mod connection;

/// Reconnect delay policy.
pub mod reconnect;

/// tokio-tungstenite socket transport.
pub mod websocket;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionEventKind, ConnectionHandler, ConnectionState,
    Heartbeat, PersistentConnection, StreamError,
};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, ReconnectPolicy};
pub use websocket::WebSocketTransport;
