//! Venue Adapters
//!
//! One [`VenueAdapter`] per supported venue, all written against the same
//! ports. Each adapter owns its symbol registry; crypto venues also own a
//! [`hub::StreamHub`], Oanda a [`polling::PollingHub`].
//!
//! [`build_gateway`] wires production transports; [`build_gateway_with`]
//! accepts any transports, which is how the integration tests drive
//! adapters against scripted venues.

use std::sync::Arc;

use tracing::warn;

use crate::application::gateway::{Gateway, VenueAdapter};
use crate::application::ports::{RestTransport, SocketTransport, TransportError};
use crate::domain::market::{Market, MarketList};
use crate::domain::normalizer::Normalizer;
use crate::domain::symbol::{CanonicalSymbol, SymbolRegistry};
use crate::domain::timeframe::Timeframe;
use crate::domain::venue::{VenueDescriptor, VenueId};
use crate::error::{GatewayError, GatewayResult};
use crate::infrastructure::config::{GatewayConfig, OandaCredentials, StreamSettings};
use crate::infrastructure::http::HttpTransport;
use crate::infrastructure::stream::{
    ConnectionConfig, ReconnectConfig, StreamError, WebSocketTransport,
};

/// Binance USDⓈ-M futures.
pub mod binance;

/// Bybit linear perpetuals.
pub mod bybit;

/// Stream hub shared by socket venues.
pub mod hub;

/// Oanda v20.
pub mod oanda;

/// OKX perpetual swaps.
pub mod okx;

/// REST polling in place of a stream.
pub mod polling;

/// JSON field helpers.
pub mod wire;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use oanda::OandaAdapter;
pub use okx::OkxAdapter;

// =============================================================================
// Venue Context
// =============================================================================

/// Everything an adapter needs from the outside.
#[derive(Clone)]
pub struct VenueContext {
    /// Static venue description.
    pub descriptor: Arc<VenueDescriptor>,
    /// REST transport rooted at the venue's base URL.
    pub rest: Arc<dyn RestTransport>,
    /// Socket transport for the venue stream.
    pub sockets: Arc<dyn SocketTransport>,
    /// Timestamp normalization.
    pub normalizer: Normalizer,
    /// Reconnect, replay and polling settings.
    pub stream: StreamSettings,
}

impl std::fmt::Debug for VenueContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueContext")
            .field("venue", &self.descriptor.id)
            .field("normalizer", &self.normalizer)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl VenueContext {
    /// Venue served.
    #[must_use]
    pub fn venue(&self) -> VenueId {
        self.descriptor.id
    }

    /// Native granularity for `timeframe`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::UnsupportedTimeframe`] when the venue has none.
    pub fn native_timeframe(&self, timeframe: Timeframe) -> GatewayResult<&str> {
        self.descriptor
            .native_timeframe(timeframe)
            .ok_or_else(|| GatewayError::UnsupportedTimeframe {
                venue: self.venue(),
                timeframe: timeframe.to_string(),
            })
    }

    /// Stream hub for the venue's socket, if it has one.
    pub(crate) fn stream_hub(&self, protocol: Arc<dyn hub::StreamProtocol>) -> Option<hub::StreamHub> {
        let url = self.descriptor.stream_url.as_deref()?;
        let config = ConnectionConfig::new(url)
            .with_reconnect(ReconnectConfig::from_settings(&self.stream));
        Some(hub::StreamHub::connect_with(
            self.venue(),
            config,
            Arc::clone(&self.sockets),
            protocol,
            self.stream.resubscribe_on_reconnect,
        ))
    }

    /// Venue-time cursor for a caller-supplied canonical end time.
    pub(crate) const fn venue_cursor(&self, end_time: Option<i64>) -> Option<i64> {
        match end_time {
            Some(ts) => Some(self.normalizer.offset().remove(ts)),
            None => None,
        }
    }

    /// Assemble a market list, sorting symbols.
    pub(crate) fn market_list(&self, markets: Vec<Market>) -> MarketList {
        let mut symbols: Vec<CanonicalSymbol> = markets.iter().map(|m| m.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        MarketList {
            venue: self.venue(),
            symbols,
            markets,
            timeframes: self.descriptor.supported_timeframes(),
        }
    }
}

/// The hub, or [`StreamError::NoEndpoint`] for venues configured without a
/// stream URL.
pub(crate) fn require_hub(hub: Option<&hub::StreamHub>) -> GatewayResult<&hub::StreamHub> {
    hub.ok_or(GatewayError::Stream(StreamError::NoEndpoint))
}

/// Rebuild `registry` from loaded markets, reporting instruments that
/// collide on a canonical symbol already taken by an earlier one.
pub(crate) fn register_markets(registry: &SymbolRegistry, markets: &[Market]) {
    let rejected = registry.replace_all(markets.iter().map(|m| (m.id.clone(), m.symbol.clone())));
    for (raw, canonical) in rejected {
        warn!(
            venue = %registry.venue(),
            raw = %raw,
            symbol = %canonical,
            "Instrument shares a canonical symbol, skipped"
        );
    }
}

/// Keep tickers whose symbol is in `wanted` (all when `None`).
pub(crate) fn retain_symbols<T>(
    items: Vec<T>,
    wanted: Option<&[CanonicalSymbol]>,
    symbol_of: impl Fn(&T) -> &CanonicalSymbol,
) -> Vec<T> {
    match wanted {
        Some(wanted) => items
            .into_iter()
            .filter(|item| wanted.contains(symbol_of(item)))
            .collect(),
        None => items,
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Build one adapter.
#[must_use]
pub fn build_adapter(
    context: VenueContext,
    oanda: Option<&OandaCredentials>,
) -> Arc<dyn VenueAdapter> {
    match context.venue() {
        VenueId::Binance => Arc::new(BinanceAdapter::new(context)),
        VenueId::Bybit => Arc::new(BybitAdapter::new(context)),
        VenueId::Okx => Arc::new(OkxAdapter::new(context)),
        VenueId::Oanda => Arc::new(OandaAdapter::new(
            context,
            oanda.and_then(OandaCredentials::account_id).map(str::to_string),
        )),
    }
}

/// Build a gateway over arbitrary transports.
///
/// `rest_for` is called once per configured venue with its descriptor.
///
/// # Errors
///
/// Propagates `rest_for` failures and unknown catalog entries.
pub fn build_gateway_with<F>(
    config: &GatewayConfig,
    mut rest_for: F,
    sockets: Arc<dyn SocketTransport>,
) -> GatewayResult<Gateway>
where
    F: FnMut(&VenueDescriptor) -> Result<Arc<dyn RestTransport>, TransportError>,
{
    let normalizer = Normalizer::new(config.timestamp_offset);
    let mut gateway = Gateway::new();

    for &venue in &config.venues {
        let descriptor = config
            .catalog
            .get(venue)
            .ok_or_else(|| GatewayError::UnknownVenue(venue.to_string()))?;
        let rest = rest_for(descriptor.as_ref())?;
        let context = VenueContext {
            descriptor,
            rest,
            sockets: Arc::clone(&sockets),
            normalizer,
            stream: config.stream.clone(),
        };
        gateway.register(build_adapter(context, config.oanda.as_ref()));
    }

    Ok(gateway)
}

/// Build a gateway with reqwest and tokio-tungstenite transports.
///
/// # Errors
///
/// Fails if an HTTP client cannot be created.
pub fn build_gateway(config: &GatewayConfig) -> GatewayResult<Gateway> {
    let timeout = config.rest_timeout;
    let oanda_token = config.oanda.as_ref().map(|c| c.api_token().to_string());

    build_gateway_with(
        config,
        |descriptor| {
            let mut http = HttpTransport::new(descriptor.id, descriptor.rest_url.clone(), timeout)?;
            if descriptor.id == VenueId::Oanda {
                if let Some(token) = &oanda_token {
                    http = http.with_bearer_token(token);
                }
            }
            Ok(Arc::new(http) as Arc<dyn RestTransport>)
        },
        Arc::new(WebSocketTransport::new()),
    )
}
