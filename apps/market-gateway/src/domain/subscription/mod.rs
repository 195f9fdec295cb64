//! Stream Subscription Book
//!
//! Tracks which callbacks are attached to which stream channel for one
//! venue. A channel key is venue-specific (`!ticker@arr`, `tickers.BTCUSDT`,
//! `tickers:*`).
//!
//! # Design
//!
//! Several callers may attach to the same channel. The book reports when a
//! channel gains its first callback (the adapter must subscribe upstream)
//! and when a channel is withdrawn (the adapter may unsubscribe upstream),
//! so one upstream subscription serves every local subscriber.
//!
//! Callbacks are cloned out of the lock before being invoked; a callback may
//! therefore subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::market::StreamEvent;
use super::venue::VenueId;

// =============================================================================
// Types
// =============================================================================

/// Venue-specific stream channel identifier.
pub type ChannelKey = String;

/// Handle for one callback registration.
pub type SubscriptionId = Uuid;

/// Subscriber callback.
pub type StreamCallback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// A live subscription returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Venue the subscription belongs to.
    pub venue: VenueId,
    /// Channel the callback is attached to; pass it to `unsubscribe`.
    pub channel_key: ChannelKey,
    /// Registration handle.
    pub id: SubscriptionId,
}

/// Outcome of attaching a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// New registration handle.
    pub id: SubscriptionId,
    /// The channel had no callbacks before this one.
    pub first_on_channel: bool,
}

/// Book statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Channels with at least one callback.
    pub channels: usize,
    /// Callbacks across all channels.
    pub callbacks: usize,
}

// =============================================================================
// Subscription Book
// =============================================================================

struct Entry {
    id: SubscriptionId,
    callback: StreamCallback,
}

/// Channel → callbacks map for one venue.
#[derive(Default)]
pub struct SubscriptionBook {
    channels: RwLock<HashMap<ChannelKey, Vec<Entry>>>,
}

impl fmt::Debug for SubscriptionBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionBook")
            .field("stats", &self.stats())
            .finish()
    }
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a callback to a channel.
    pub fn add(&self, channel: &str, callback: StreamCallback) -> AddOutcome {
        let id = Uuid::new_v4();
        let mut channels = self.channels.write();
        let entries = channels.entry(channel.to_string()).or_default();
        let first_on_channel = entries.is_empty();
        entries.push(Entry { id, callback });
        AddOutcome {
            id,
            first_on_channel,
        }
    }

    /// Detach one callback.
    ///
    /// Returns `true` if the channel has no callbacks left.
    pub fn remove(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write();
        let Some(entries) = channels.get_mut(channel) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return false;
        }
        if entries.is_empty() {
            channels.remove(channel);
            return true;
        }
        false
    }

    /// Withdraw a channel and every callback on it.
    ///
    /// Returns `true` if the channel existed.
    pub fn remove_channel(&self, channel: &str) -> bool {
        self.channels.write().remove(channel).is_some()
    }

    /// Whether the channel has callbacks.
    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.read().contains_key(channel)
    }

    /// Callbacks attached to a channel, in registration order.
    #[must_use]
    pub fn callbacks(&self, channel: &str) -> Vec<StreamCallback> {
        self.channels
            .read()
            .get(channel)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
            .unwrap_or_default()
    }

    /// Invoke every callback on each of `channels` with `event`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch<S: AsRef<str>>(&self, channels: &[S], event: &StreamEvent) -> usize {
        let targets: Vec<StreamCallback> = {
            let book = self.channels.read();
            channels
                .iter()
                .filter_map(|channel| book.get(channel.as_ref()))
                .flat_map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)))
                .collect()
        };
        for callback in &targets {
            callback(event);
        }
        targets.len()
    }

    /// Channels with at least one callback, sorted.
    #[must_use]
    pub fn active_channels(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.channels.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every channel.
    pub fn clear(&self) {
        self.channels.write().clear();
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let channels = self.channels.read();
        SubscriptionStats {
            channels: channels.len(),
            callbacks: channels.values().map(Vec::len).sum(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
