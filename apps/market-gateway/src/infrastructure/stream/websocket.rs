//! WebSocket transport (tokio-tungstenite).
//!
//! Each opened socket gets one pump task that forwards outbound text from
//! the session's sender to the socket, answers pings, and pushes inbound
//! text to the session's receiver. Dropping the outbound sender sends a
//! close frame and ends the task.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::application::ports::{SocketEvent, SocketSession, SocketTransport, TransportError};

/// Frames buffered per direction.
const CHANNEL_CAPACITY: usize = 1024;

/// Production [`SocketTransport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<SocketSession, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel::<SocketEvent>(CHANNEL_CAPACITY);
        let url = url.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        let Some(text) = outgoing else {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            let _ = inbound_tx.send(SocketEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(SocketEvent::Message(text.as_str().to_owned())).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                if inbound_tx.send(SocketEvent::Message(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => debug!(url = %url, "Ignoring non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(url = %url, frame = ?frame, "Server closed socket");
                            let _ = inbound_tx.send(SocketEvent::Closed).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(SocketEvent::Error(e.to_string())).await;
                            break;
                        }
                        None => {
                            let _ = inbound_tx.send(SocketEvent::Closed).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(SocketSession { outbound, inbound })
    }
}
