//! Stream Hub
//!
//! Joins one venue's [`PersistentConnection`] to its [`SubscriptionBook`].
//! The venue-specific parts (how topics are requested and how inbound frames
//! map to channels) come from a [`StreamProtocol`].
//!
//! # Channels and topics
//!
//! A channel is what local subscribers attach to (`tickers.BTCUSDT`,
//! `tickers.*`). A topic is what the venue is asked for on the wire. A
//! channel owns one or more topics, and channels may share topics: the
//! all-tickers channel covers every per-symbol topic. A topic is requested
//! when the first channel needing it appears and withdrawn when the last
//! one goes.
//!
//! # Reconnects
//!
//! Topics are not replayed after a reconnect unless
//! `resubscribe_on_reconnect` is set.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::application::ports::SocketTransport;
use crate::domain::market::StreamEvent;
use crate::domain::subscription::{
    ChannelKey, StreamCallback, Subscription, SubscriptionBook, SubscriptionId,
};
use crate::domain::venue::VenueId;
use crate::error::GatewayResult;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::{
    ConnectionConfig, ConnectionEvent, ConnectionEventKind, ConnectionState, Heartbeat,
    PersistentConnection, StreamError,
};

/// An inbound frame matched to the channels that should see it.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    /// Channels to dispatch to.
    pub channels: Vec<ChannelKey>,
    /// Normalized event.
    pub event: StreamEvent,
}

/// Venue wire protocol for ticker streams.
pub trait StreamProtocol: Send + Sync {
    /// Map an inbound frame to events. Acks, pongs and unrelated frames
    /// yield nothing.
    fn route(&self, frame: &Value) -> Vec<RoutedEvent>;

    /// Control messages requesting `topics`, already batched.
    fn subscribe_messages(&self, topics: &[String]) -> Vec<String>;

    /// Control messages withdrawing `topics`; empty when the venue has no
    /// unsubscribe concept.
    fn unsubscribe_messages(&self, topics: &[String]) -> Vec<String>;

    /// Application-level keepalive, if the venue needs one.
    fn heartbeat(&self) -> Option<Heartbeat> {
        None
    }
}

type TopicTable = Arc<Mutex<HashMap<ChannelKey, Vec<String>>>>;

/// One venue's live stream.
pub struct StreamHub {
    venue: VenueId,
    connection: Arc<PersistentConnection>,
    book: Arc<SubscriptionBook>,
    protocol: Arc<dyn StreamProtocol>,
    topics: TopicTable,
    started: OnceCell<()>,
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub")
            .field("venue", &self.venue)
            .field("connection", &self.connection)
            .field("book", &self.book)
            .finish_non_exhaustive()
    }
}

impl StreamHub {
    /// Wire a connection to a fresh subscription book.
    ///
    /// The connection is not opened until the first subscription.
    #[must_use]
    pub fn new(
        venue: VenueId,
        connection: Arc<PersistentConnection>,
        protocol: Arc<dyn StreamProtocol>,
        resubscribe_on_reconnect: bool,
    ) -> Self {
        let book = Arc::new(SubscriptionBook::new());
        let topics: TopicTable = Arc::new(Mutex::new(HashMap::new()));

        {
            let protocol = Arc::clone(&protocol);
            let book = Arc::clone(&book);
            connection.on(ConnectionEventKind::Message, move |event| {
                if let ConnectionEvent::Message(frame) = event {
                    for routed in protocol.route(frame) {
                        let delivered = book.dispatch(&routed.channels, &routed.event);
                        if delivered > 0 {
                            metrics::record_events_dispatched(venue, delivered);
                        }
                    }
                }
            });
        }

        if resubscribe_on_reconnect {
            let weak: Weak<PersistentConnection> = Arc::downgrade(&connection);
            let protocol = Arc::clone(&protocol);
            let topics = Arc::clone(&topics);
            connection.on(ConnectionEventKind::Opened, move |event| {
                if !matches!(event, ConnectionEvent::Opened { reconnect: true }) {
                    return;
                }
                let Some(connection) = weak.upgrade() else {
                    return;
                };
                let active: Vec<String> = union(&topics.lock())
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if active.is_empty() {
                    return;
                }
                info!(venue = %venue, topics = active.len(), "Replaying subscriptions after reconnect");
                for message in protocol.subscribe_messages(&active) {
                    connection.send(message);
                }
            });
        }

        Self {
            venue,
            connection,
            book,
            protocol,
            topics,
            started: OnceCell::new(),
        }
    }

    /// Build the connection from a config and wire it up.
    #[must_use]
    pub fn connect_with(
        venue: VenueId,
        config: ConnectionConfig,
        transport: Arc<dyn SocketTransport>,
        protocol: Arc<dyn StreamProtocol>,
        resubscribe_on_reconnect: bool,
    ) -> Self {
        let config = config.with_heartbeat(protocol.heartbeat());
        let connection = Arc::new(PersistentConnection::new(venue, config, transport));
        Self::new(venue, connection, protocol, resubscribe_on_reconnect)
    }

    /// Attach `callback` to `channel`, requesting any of `topics` not
    /// already live. Opens the connection on first use.
    ///
    /// # Errors
    ///
    /// Stream handshake failure on first use, or the hub was shut down.
    pub async fn subscribe(
        &self,
        channel: &str,
        topics: Vec<String>,
        callback: StreamCallback,
    ) -> GatewayResult<Subscription> {
        if self.connection.is_closed() {
            return Err(StreamError::Closed.into());
        }
        self.ensure_connected().await?;

        let outcome = self.book.add(channel, callback);
        if outcome.first_on_channel {
            let fresh: Vec<String> = {
                let mut table = self.topics.lock();
                let live = union(&table);
                let fresh = dedup(topics.iter().filter(|t| !live.contains(t.as_str())));
                table.insert(channel.to_string(), topics);
                fresh
            };
            if !fresh.is_empty() {
                debug!(venue = %self.venue, channel, topics = fresh.len(), "Requesting topics");
                for message in self.protocol.subscribe_messages(&fresh) {
                    self.connection.send(message);
                }
            }
        }
        metrics::set_subscriptions(self.venue, self.book.stats().channels);

        Ok(Subscription {
            venue: self.venue,
            channel_key: channel.to_string(),
            id: outcome.id,
        })
    }

    /// Detach one callback (`Some(id)`) or the whole channel (`None`).
    ///
    /// Topics no remaining channel needs are withdrawn. Returns `true` if
    /// the channel is gone afterwards.
    pub fn unsubscribe(&self, channel: &str, id: Option<SubscriptionId>) -> bool {
        let emptied = match id {
            Some(id) => self.book.remove(channel, id),
            None => self.book.remove_channel(channel),
        };
        if !emptied {
            return false;
        }

        let orphaned: Vec<String> = {
            let mut table = self.topics.lock();
            let released = table.remove(channel).unwrap_or_default();
            let still_live = union(&table);
            dedup(released.iter().filter(|t| !still_live.contains(t.as_str())))
        };
        if !orphaned.is_empty() {
            debug!(venue = %self.venue, channel, topics = orphaned.len(), "Withdrawing topics");
            for message in self.protocol.unsubscribe_messages(&orphaned) {
                self.connection.send(message);
            }
        }
        metrics::set_subscriptions(self.venue, self.book.stats().channels);
        true
    }

    /// Active channels, sorted.
    #[must_use]
    pub fn active_channels(&self) -> Vec<ChannelKey> {
        self.book.active_channels()
    }

    /// Connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Close the connection and drop every subscriber.
    pub fn shutdown(&self) {
        self.connection.close();
        self.book.clear();
        self.topics.lock().clear();
        metrics::set_subscriptions(self.venue, 0);
    }

    async fn ensure_connected(&self) -> GatewayResult<()> {
        self.started
            .get_or_try_init(|| async { self.connection.connect().await })
            .await?;
        Ok(())
    }
}

/// Every topic some channel still needs.
fn union(table: &HashMap<ChannelKey, Vec<String>>) -> BTreeSet<&str> {
    table.values().flatten().map(String::as_str).collect()
}

fn dedup<'a>(topics: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    topics
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::EventType;
    use crate::domain::symbol::CanonicalSymbol;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// `{"sub": [...]}` / `{"unsub": [...]}` control frames; inbound
    /// `{"topic": "t.X"}` routes to channels `t.X` and `t.*`.
    struct EchoProtocol;

    impl StreamProtocol for EchoProtocol {
        fn route(&self, frame: &Value) -> Vec<RoutedEvent> {
            let Some(topic) = frame.get("topic").and_then(Value::as_str) else {
                return Vec::new();
            };
            vec![RoutedEvent {
                channels: vec![topic.to_string(), "t.*".to_string()],
                event: StreamEvent {
                    venue: VenueId::Bybit,
                    symbol: CanonicalSymbol::standardize(VenueId::Bybit, topic),
                    event_type: EventType::Ticker,
                    timestamp: 0,
                    raw: frame.clone(),
                },
            }]
        }

        fn subscribe_messages(&self, topics: &[String]) -> Vec<String> {
            vec![json!({ "sub": topics }).to_string()]
        }

        fn unsubscribe_messages(&self, topics: &[String]) -> Vec<String> {
            vec![json!({ "unsub": topics }).to_string()]
        }
    }

    #[test]
    fn union_merges_shared_topics() {
        let mut table = HashMap::new();
        table.insert("a".to_string(), vec!["x".to_string(), "y".to_string()]);
        table.insert("b".to_string(), vec!["y".to_string(), "z".to_string()]);

        let all: Vec<&str> = union(&table).into_iter().collect();
        assert_eq!(all, vec!["x", "y", "z"]);
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let topics = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup(topics.iter()), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn routed_frames_reach_both_channels() {
        let protocol = EchoProtocol;
        let routed = protocol.route(&json!({"topic": "t.BTCUSDT"}));
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].channels, vec!["t.BTCUSDT", "t.*"]);
        assert!(protocol.route(&json!({"op": "pong"})).is_empty());

        let book = SubscriptionBook::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for channel in ["t.BTCUSDT", "t.*"] {
            let hits = Arc::clone(&hits);
            book.add(
                channel,
                Arc::new(move |_: &StreamEvent| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(book.dispatch(&routed[0].channels, &routed[0].event), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
