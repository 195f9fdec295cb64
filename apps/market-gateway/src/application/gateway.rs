//! Gateway Façade
//!
//! One [`VenueAdapter`] per registered venue, addressed by venue name. The
//! façade parses caller input (venue, symbol, timeframe), checks the
//! venue's capability flags and hands typed arguments to the adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::market::{Candle, MarketList, StreamEvent, Ticker};
use crate::domain::subscription::{StreamCallback, Subscription, SubscriptionId};
use crate::domain::symbol::CanonicalSymbol;
use crate::domain::timeframe::Timeframe;
use crate::domain::venue::{Capabilities, Capability, VenueDescriptor, VenueId, VenueKind};
use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// Adapter Contract
// =============================================================================

/// History request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OhlcvRequest {
    /// Candles wanted; the venue default when `None`.
    pub limit: Option<usize>,
    /// Newest candle time to include, in canonical (offset) milliseconds.
    pub end_cursor: Option<i64>,
    /// Backfill closed-session gaps regardless of timeframe.
    pub fill_gaps: bool,
}

impl OhlcvRequest {
    /// Request the `limit` most recent candles.
    #[must_use]
    pub const fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            end_cursor: None,
            fill_gaps: false,
        }
    }

    /// End the series at `end_cursor`.
    #[must_use]
    pub const fn ending_at(mut self, end_cursor: i64) -> Self {
        self.end_cursor = Some(end_cursor);
        self
    }
}

/// Everything a venue offers, in canonical types.
#[async_trait]
pub trait VenueAdapter: Send + Sync + std::fmt::Debug {
    /// Static description.
    fn descriptor(&self) -> &VenueDescriptor;

    /// Ascending, deduplicated candles.
    async fn fetch_ohlcv(
        &self,
        symbol: &CanonicalSymbol,
        timeframe: Timeframe,
        request: OhlcvRequest,
    ) -> GatewayResult<Vec<Candle>>;

    /// Instrument list; refreshes the symbol registry.
    async fn fetch_markets(&self) -> GatewayResult<MarketList>;

    /// Snapshot for one symbol.
    async fn fetch_ticker(&self, symbol: &CanonicalSymbol) -> GatewayResult<Ticker>;

    /// Snapshots for `symbols`, or every listed symbol.
    async fn fetch_tickers(&self, symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>>;

    /// Live ticker events for one symbol.
    async fn subscribe_ticker(
        &self,
        symbol: &CanonicalSymbol,
        callback: StreamCallback,
    ) -> GatewayResult<Subscription>;

    /// Live ticker events for every symbol.
    async fn subscribe_all_tickers(&self, callback: StreamCallback) -> GatewayResult<Subscription>;

    /// Drop one subscriber (`Some(id)`) or the whole channel (`None`).
    /// Returns `true` if the channel is gone afterwards.
    async fn unsubscribe(&self, channel: &str, id: Option<SubscriptionId>) -> GatewayResult<bool>;

    /// Close streams and stop pollers.
    async fn shutdown(&self);
}

// =============================================================================
// Gateway Info
// =============================================================================

/// One registered venue as reported by [`Gateway::info`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueSummary {
    /// Canonical venue tag.
    pub id: VenueId,
    /// Display name.
    pub name: String,
    /// Short display name.
    pub short_name: String,
    /// One-line description.
    pub description: String,
    /// Asset family.
    pub kind: VenueKind,
    /// Capability flags.
    pub capabilities: Capabilities,
    /// Timeframes with a native granularity.
    pub timeframes: Vec<Timeframe>,
}

impl From<&VenueDescriptor> for VenueSummary {
    fn from(descriptor: &VenueDescriptor) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name.clone(),
            short_name: descriptor.short_name.clone(),
            description: descriptor.description.clone(),
            kind: descriptor.kind,
            capabilities: descriptor.capabilities,
            timeframes: descriptor.supported_timeframes(),
        }
    }
}

/// Registered venues.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayInfo {
    /// One entry per venue, ordered by id.
    pub venues: Vec<VenueSummary>,
}

// =============================================================================
// Gateway
// =============================================================================

/// Entry point for callers.
#[derive(Debug, Default)]
pub struct Gateway {
    adapters: BTreeMap<VenueId, Arc<dyn VenueAdapter>>,
}

impl Gateway {
    /// Empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for its venue.
    pub fn register(&mut self, adapter: Arc<dyn VenueAdapter>) {
        let venue = adapter.descriptor().id;
        info!(venue = %venue, "Venue registered");
        self.adapters.insert(venue, adapter);
    }

    /// Registered venue ids.
    #[must_use]
    pub fn venues(&self) -> Vec<VenueId> {
        self.adapters.keys().copied().collect()
    }

    /// Registered venues with their capabilities.
    #[must_use]
    pub fn info(&self) -> GatewayInfo {
        GatewayInfo {
            venues: self
                .adapters
                .values()
                .map(|adapter| VenueSummary::from(adapter.descriptor()))
                .collect(),
        }
    }

    /// Adapter for a venue name (`BINANCE`, `bybit`, ...).
    ///
    /// # Errors
    ///
    /// [`GatewayError::UnknownVenue`] for unparseable or unregistered names.
    pub fn adapter(&self, venue: &str) -> GatewayResult<&Arc<dyn VenueAdapter>> {
        venue
            .parse::<VenueId>()
            .ok()
            .and_then(|id| self.adapters.get(&id))
            .ok_or_else(|| GatewayError::UnknownVenue(venue.to_string()))
    }

    /// Candles for `symbol` on `venue`, oldest first.
    ///
    /// # Errors
    ///
    /// Unknown venue or symbol, unsupported timeframe, or any upstream
    /// failure.
    pub async fn fetch_ohlcv(
        &self,
        venue: &str,
        symbol: &str,
        timeframe: &str,
        request: OhlcvRequest,
    ) -> GatewayResult<Vec<Candle>> {
        let adapter = self.capable(venue, Capability::FetchOhlcv)?;
        let symbol = resolve_symbol(adapter.as_ref(), symbol)?;
        let timeframe = resolve_timeframe(adapter.as_ref(), timeframe)?;
        debug!(venue = %adapter.descriptor().id, symbol = %symbol, timeframe = %timeframe, limit = ?request.limit, "Fetching OHLCV");
        adapter.fetch_ohlcv(&symbol, timeframe, request).await
    }

    /// Instrument list for `venue`.
    ///
    /// # Errors
    ///
    /// Unknown venue or upstream failure.
    pub async fn fetch_markets(&self, venue: &str) -> GatewayResult<MarketList> {
        self.capable(venue, Capability::FetchMarkets)?
            .fetch_markets()
            .await
    }

    /// Ticker snapshot.
    ///
    /// # Errors
    ///
    /// Unknown venue or symbol, or upstream failure.
    pub async fn fetch_ticker(&self, venue: &str, symbol: &str) -> GatewayResult<Ticker> {
        let adapter = self.capable(venue, Capability::FetchTickers)?;
        let symbol = resolve_symbol(adapter.as_ref(), symbol)?;
        adapter.fetch_ticker(&symbol).await
    }

    /// Ticker snapshots for `symbols`, or all when `None`.
    ///
    /// # Errors
    ///
    /// Unknown venue or symbol, or upstream failure.
    pub async fn fetch_tickers(
        &self,
        venue: &str,
        symbols: Option<&[&str]>,
    ) -> GatewayResult<Vec<Ticker>> {
        let adapter = self.capable(venue, Capability::FetchTickers)?;
        let symbols = symbols
            .map(|symbols| {
                symbols
                    .iter()
                    .map(|s| resolve_symbol(adapter.as_ref(), s))
                    .collect::<GatewayResult<Vec<_>>>()
            })
            .transpose()?;
        adapter.fetch_tickers(symbols.as_deref()).await
    }

    /// Subscribe to one symbol's ticker.
    ///
    /// # Errors
    ///
    /// Unknown venue or symbol, or the stream could not be opened.
    pub async fn subscribe_ticker<F>(
        &self,
        venue: &str,
        symbol: &str,
        callback: F,
    ) -> GatewayResult<Subscription>
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let adapter = self.capable(venue, Capability::TickerStream)?;
        let symbol = resolve_symbol(adapter.as_ref(), symbol)?;
        let subscription = adapter.subscribe_ticker(&symbol, Arc::new(callback)).await?;
        info!(venue = %subscription.venue, channel = %subscription.channel_key, "Subscribed");
        Ok(subscription)
    }

    /// Subscribe to every symbol's ticker.
    ///
    /// # Errors
    ///
    /// Unknown venue, or the stream could not be opened.
    pub async fn subscribe_all_tickers<F>(&self, venue: &str, callback: F) -> GatewayResult<Subscription>
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let adapter = self.capable(venue, Capability::AllTickersStream)?;
        let subscription = adapter.subscribe_all_tickers(Arc::new(callback)).await?;
        info!(venue = %subscription.venue, channel = %subscription.channel_key, "Subscribed");
        Ok(subscription)
    }

    /// Drop every subscriber on `channel`.
    ///
    /// # Errors
    ///
    /// Unknown venue.
    pub async fn unsubscribe(&self, venue: &str, channel: &str) -> GatewayResult<bool> {
        self.adapter(venue)?.unsubscribe(channel, None).await
    }

    /// Drop one subscriber.
    ///
    /// # Errors
    ///
    /// The subscription's venue is no longer registered.
    pub async fn remove_subscription(&self, subscription: &Subscription) -> GatewayResult<bool> {
        self.adapters
            .get(&subscription.venue)
            .ok_or_else(|| GatewayError::UnknownVenue(subscription.venue.to_string()))?
            .unsubscribe(&subscription.channel_key, Some(subscription.id))
            .await
    }

    /// Close every venue stream and poller.
    pub async fn shutdown(&self) {
        for (venue, adapter) in &self.adapters {
            adapter.shutdown().await;
            debug!(venue = %venue, "Venue shut down");
        }
    }

    fn capable(&self, venue: &str, capability: Capability) -> GatewayResult<&Arc<dyn VenueAdapter>> {
        let adapter = self.adapter(venue)?;
        let descriptor = adapter.descriptor();
        if descriptor.capabilities.supports(capability) {
            Ok(adapter)
        } else {
            Err(GatewayError::Unsupported {
                venue: descriptor.id,
                capability,
            })
        }
    }
}

fn resolve_symbol(adapter: &dyn VenueAdapter, input: &str) -> GatewayResult<CanonicalSymbol> {
    let venue = adapter.descriptor().id;
    CanonicalSymbol::resolve(venue, input)
        .filter(|symbol| !symbol.pair().is_empty())
        .ok_or_else(|| GatewayError::UnknownSymbol {
            venue,
            symbol: input.to_string(),
        })
}

fn resolve_timeframe(adapter: &dyn VenueAdapter, input: &str) -> GatewayResult<Timeframe> {
    let descriptor = adapter.descriptor();
    input
        .parse::<Timeframe>()
        .ok()
        .filter(|tf| descriptor.native_timeframe(*tf).is_some())
        .ok_or_else(|| GatewayError::UnsupportedTimeframe {
            venue: descriptor.id,
            timeframe: input.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::venue::VenueKind;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        Adapter {}

        #[async_trait]
        impl VenueAdapter for Adapter {
            fn descriptor(&self) -> &VenueDescriptor;
            async fn fetch_ohlcv(
                &self,
                symbol: &CanonicalSymbol,
                timeframe: Timeframe,
                request: OhlcvRequest,
            ) -> GatewayResult<Vec<Candle>>;
            async fn fetch_markets(&self) -> GatewayResult<MarketList>;
            async fn fetch_ticker(&self, symbol: &CanonicalSymbol) -> GatewayResult<Ticker>;
            async fn fetch_tickers<'a, 'b>(&'a self, symbols: Option<&'b [CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>>;
            async fn subscribe_ticker(
                &self,
                symbol: &CanonicalSymbol,
                callback: StreamCallback,
            ) -> GatewayResult<Subscription>;
            async fn subscribe_all_tickers(&self, callback: StreamCallback) -> GatewayResult<Subscription>;
            async fn unsubscribe(&self, channel: &str, id: Option<SubscriptionId>) -> GatewayResult<bool>;
            async fn shutdown(&self);
        }
    }

    impl std::fmt::Debug for MockAdapter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockAdapter").finish()
        }
    }

    fn descriptor(id: VenueId, capabilities: Capabilities) -> VenueDescriptor {
        let mut timeframes = BTreeMap::new();
        timeframes.insert(Timeframe::H1, "1h".to_string());
        VenueDescriptor {
            id,
            name: format!("{id} test"),
            short_name: id.tag().to_string(),
            description: String::new(),
            kind: VenueKind::Crypto,
            rest_url: "http://localhost".to_string(),
            stream_url: None,
            timeframes,
            capabilities,
            static_symbols: Vec::new(),
        }
    }

    fn gateway_with(adapter: MockAdapter) -> Gateway {
        let mut gateway = Gateway::new();
        gateway.register(Arc::new(adapter));
        gateway
    }

    #[tokio::test]
    async fn unknown_venue_is_rejected() {
        let gateway = Gateway::new();
        let err = gateway.fetch_markets("KRAKEN").await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownVenue(name) if name == "KRAKEN"));
    }

    #[tokio::test]
    async fn symbols_for_another_venue_are_unknown() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_descriptor()
            .return_const(descriptor(VenueId::Binance, Capabilities::streaming()));
        adapter.expect_fetch_ticker().never();
        let gateway = gateway_with(adapter);

        let err = gateway.fetch_ticker("binance", "BYBIT:BTC/USDT").await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownSymbol { venue: VenueId::Binance, .. }));
    }

    #[tokio::test]
    async fn unmapped_timeframe_never_reaches_the_adapter() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_descriptor()
            .return_const(descriptor(VenueId::Okx, Capabilities::streaming()));
        adapter.expect_fetch_ohlcv().never();
        let gateway = gateway_with(adapter);

        for timeframe in ["4h", "7m"] {
            let err = gateway
                .fetch_ohlcv("OKX", "BTC/USDT", timeframe, OhlcvRequest::latest(10))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::UnsupportedTimeframe { .. }), "{timeframe}");
        }
    }

    #[tokio::test]
    async fn ohlcv_arguments_are_parsed_and_forwarded() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_descriptor()
            .return_const(descriptor(VenueId::Bybit, Capabilities::streaming()));
        adapter
            .expect_fetch_ohlcv()
            .withf(|symbol, timeframe, request| {
                symbol.as_str() == "BYBIT:ETH/USDT"
                    && *timeframe == Timeframe::H1
                    && *request == OhlcvRequest::latest(3).ending_at(42)
            })
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));
        let gateway = gateway_with(adapter);

        let candles = gateway
            .fetch_ohlcv("bybit", "eth-usdt", "1h", OhlcvRequest::latest(3).ending_at(42))
            .await
            .unwrap();
        assert!(candles.is_empty());
    }

    #[tokio::test]
    async fn missing_capability_is_unsupported() {
        let mut capabilities = Capabilities::polled();
        capabilities.polling_fallback = false;

        let mut adapter = MockAdapter::new();
        adapter
            .expect_descriptor()
            .return_const(descriptor(VenueId::Oanda, capabilities));
        adapter.expect_subscribe_all_tickers().never();
        let gateway = gateway_with(adapter);

        let err = gateway
            .subscribe_all_tickers("OANDA", |_: &StreamEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Unsupported { capability: Capability::AllTickersStream, .. }
        ));
    }

    #[tokio::test]
    async fn shutdown_reaches_every_adapter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut gateway = Gateway::new();
        for id in [VenueId::Binance, VenueId::Okx] {
            let mut adapter = MockAdapter::new();
            adapter
                .expect_descriptor()
                .return_const(descriptor(id, Capabilities::streaming()));
            let calls = Arc::clone(&calls);
            adapter.expect_shutdown().times(1).returning(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            gateway.register(Arc::new(adapter));
        }

        gateway.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.venues(), vec![VenueId::Binance, VenueId::Okx]);
    }

    #[test]
    fn info_lists_capabilities_and_timeframes() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_descriptor()
            .return_const(descriptor(VenueId::Bybit, Capabilities::streaming()));
        let info = gateway_with(adapter).info();

        assert_eq!(info.venues.len(), 1);
        assert_eq!(info.venues[0].id, VenueId::Bybit);
        assert_eq!(info.venues[0].timeframes, vec![Timeframe::H1]);
        assert!(info.venues[0].capabilities.ticker_stream);
    }
}
