//! Polling in place of a stream.
//!
//! Venues without a socket endpoint serve ticker subscriptions by polling
//! their REST ticker endpoint. Each channel gets one poller task, started
//! with its first subscriber and cancelled with its last.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::market::{EventType, StreamEvent, Ticker};
use crate::domain::subscription::{
    ChannelKey, StreamCallback, Subscription, SubscriptionBook, SubscriptionId,
};
use crate::domain::symbol::CanonicalSymbol;
use crate::domain::venue::VenueId;
use crate::error::GatewayResult;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::StreamError;

/// Shortest interval a poller runs at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something that can be polled for tickers.
#[async_trait]
pub trait TickerSource: Send + Sync {
    /// Current tickers for `symbols` (the venue's default set when `None`).
    async fn poll_tickers(&self, symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>>;
}

/// Channel-keyed pollers for one venue.
pub struct PollingHub {
    venue: VenueId,
    interval: Duration,
    book: Arc<SubscriptionBook>,
    source: Arc<dyn TickerSource>,
    tasks: Mutex<HashMap<ChannelKey, CancellationToken>>,
    root: CancellationToken,
}

impl std::fmt::Debug for PollingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingHub")
            .field("venue", &self.venue)
            .field("interval", &self.interval)
            .field("channels", &self.tasks.lock().len())
            .finish_non_exhaustive()
    }
}

impl PollingHub {
    /// Create a hub polling `source` every `interval`, floored at
    /// [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub fn new(venue: VenueId, interval: Duration, source: Arc<dyn TickerSource>) -> Self {
        Self {
            venue,
            interval: interval.max(MIN_POLL_INTERVAL),
            book: Arc::new(SubscriptionBook::new()),
            source,
            tasks: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Attach `callback` to `channel`, starting its poller if it is the
    /// first subscriber. The first poll happens one interval from now.
    ///
    /// # Errors
    ///
    /// [`StreamError::Closed`] after [`Self::shutdown`].
    pub fn subscribe(
        &self,
        channel: &str,
        symbols: Option<Vec<CanonicalSymbol>>,
        callback: StreamCallback,
    ) -> GatewayResult<Subscription> {
        if self.root.is_cancelled() {
            return Err(StreamError::Closed.into());
        }
        let outcome = self.book.add(channel, callback);
        if outcome.first_on_channel {
            let cancel = self.root.child_token();
            self.tasks.lock().insert(channel.to_string(), cancel.clone());
            tokio::spawn(poll_loop(Poller {
                venue: self.venue,
                channel: channel.to_string(),
                symbols,
                interval: self.interval,
                book: Arc::clone(&self.book),
                source: Arc::clone(&self.source),
                cancel,
            }));
            debug!(venue = %self.venue, channel, "Poller started");
        }
        metrics::set_subscriptions(self.venue, self.book.stats().channels);

        Ok(Subscription {
            venue: self.venue,
            channel_key: channel.to_string(),
            id: outcome.id,
        })
    }

    /// Detach one callback or the whole channel; the poller stops once the
    /// channel is empty. Returns `true` if the channel is gone.
    pub fn unsubscribe(&self, channel: &str, id: Option<SubscriptionId>) -> bool {
        let emptied = match id {
            Some(id) => self.book.remove(channel, id),
            None => self.book.remove_channel(channel),
        };
        if emptied {
            if let Some(cancel) = self.tasks.lock().remove(channel) {
                cancel.cancel();
                debug!(venue = %self.venue, channel, "Poller stopped");
            }
        }
        metrics::set_subscriptions(self.venue, self.book.stats().channels);
        emptied
    }

    /// Active channels, sorted.
    #[must_use]
    pub fn active_channels(&self) -> Vec<ChannelKey> {
        self.book.active_channels()
    }

    /// Stop every poller and drop every subscriber. Later subscriptions
    /// are refused.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.tasks.lock().clear();
        self.book.clear();
        metrics::set_subscriptions(self.venue, 0);
    }
}

struct Poller {
    venue: VenueId,
    channel: ChannelKey,
    symbols: Option<Vec<CanonicalSymbol>>,
    interval: Duration,
    book: Arc<SubscriptionBook>,
    source: Arc<dyn TickerSource>,
    cancel: CancellationToken,
}

async fn poll_loop(poller: Poller) {
    let mut ticks = tokio::time::interval_at(Instant::now() + poller.interval, poller.interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = poller.cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }

        let result = tokio::select! {
            () = poller.cancel.cancelled() => break,
            result = poller.source.poll_tickers(poller.symbols.as_deref()) => result,
        };

        match result {
            Ok(tickers) => {
                let channels = [poller.channel.as_str()];
                let mut delivered = 0;
                for ticker in &tickers {
                    delivered += poller.book.dispatch(&channels, &ticker_event(poller.venue, ticker));
                }
                if delivered > 0 {
                    metrics::record_events_dispatched(poller.venue, delivered);
                }
            }
            Err(e) => {
                warn!(venue = %poller.venue, channel = %poller.channel, error = %e, "Ticker poll failed");
            }
        }
    }
}

fn ticker_event(venue: VenueId, ticker: &Ticker) -> StreamEvent {
    StreamEvent {
        venue,
        symbol: ticker.symbol.clone(),
        event_type: EventType::Ticker,
        timestamp: ticker.timestamp,
        raw: serde_json::to_value(ticker).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::normalizer::{Normalizer, TickerFields};
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        polls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TickerSource for CountingSource {
        async fn poll_tickers(&self, _symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::protocol(VenueId::Oanda, "boom"));
            }
            let symbol = CanonicalSymbol::from_parts(VenueId::Oanda, "EUR", "USD");
            Ok(vec![Normalizer::default().normalize_ticker(symbol, 0, TickerFields::default())])
        }
    }

    fn hub(fail: bool) -> (PollingHub, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            polls: AtomicUsize::new(0),
            fail,
        });
        let hub = PollingHub::new(VenueId::Oanda, Duration::from_secs(5), Arc::clone(&source) as _);
        (hub, source)
    }

    fn counter() -> (Arc<AtomicUsize>, StreamCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        (hits, Arc::new(move |_: &StreamEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn polls_once_per_interval_after_the_first_wait() {
        let (hub, source) = hub(false);
        let (hits, callback) = counter();
        hub.subscribe("pricing:*", None, callback).unwrap();

        advance(1).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 0);

        advance(5).await;
        advance(5).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_unsubscribe_stops_the_poller() {
        let (hub, source) = hub(false);
        let (_, callback) = counter();
        let sub = hub.subscribe("pricing:EUR_USD", None, callback).unwrap();

        advance(6).await;
        assert!(hub.unsubscribe(&sub.channel_key, Some(sub.id)));
        let polls = source.polls.load(Ordering::SeqCst);

        advance(30).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), polls);
        assert!(hub.active_channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_logged_and_polling_continues() {
        let (hub, source) = hub(true);
        let (hits, callback) = counter();
        hub.subscribe("pricing:*", None, callback).unwrap();

        advance(16).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_every_poller() {
        let (hub, source) = hub(false);
        let (_, a) = counter();
        let (_, b) = counter();
        hub.subscribe("pricing:*", None, a).unwrap();
        hub.subscribe("pricing:EUR_USD", None, b).unwrap();

        hub.shutdown();
        advance(30).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribing_after_shutdown_is_refused() {
        let (hub, source) = hub(false);
        hub.shutdown();

        let (hits, callback) = counter();
        let err = hub.subscribe("pricing:*", None, callback).unwrap_err();
        assert!(matches!(err, GatewayError::Stream(StreamError::Closed)));
        assert!(hub.active_channels().is_empty());

        advance(30).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_the_floor() {
        let source = Arc::new(CountingSource {
            polls: AtomicUsize::new(0),
            fail: false,
        });
        let hub = PollingHub::new(VenueId::Oanda, Duration::ZERO, Arc::clone(&source) as _);
        let (hits, callback) = counter();
        hub.subscribe("pricing:*", None, callback).unwrap();

        tokio::time::sleep(MIN_POLL_INTERVAL * 3 + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
