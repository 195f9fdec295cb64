//! Canonical market data records.
//!
//! Prices and volumes are [`Decimal`]; timestamps are epoch milliseconds
//! already shifted by the gateway's timestamp offset.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use super::symbol::CanonicalSymbol;
use super::timeframe::Timeframe;
use super::venue::VenueId;

// =============================================================================
// Candles & Tickers
// =============================================================================

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    /// Canonical epoch milliseconds (offset applied).
    pub timestamp: i64,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base volume.
    pub volume: Decimal,
}

impl Candle {
    /// Flat candle at `price` with zero volume.
    #[must_use]
    pub const fn flat(timestamp: i64, price: Decimal) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
        }
    }
}

/// 24h ticker snapshot. Fields the venue did not provide are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Canonical symbol.
    pub symbol: CanonicalSymbol,
    /// Canonical epoch milliseconds (offset applied).
    pub timestamp: i64,
    /// RFC 3339 rendering of `timestamp`.
    pub datetime: String,
    /// 24h high.
    pub high: Option<Decimal>,
    /// 24h low.
    pub low: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Close price (same as `last` on venues that report one value).
    pub close: Option<Decimal>,
    /// 24h open.
    pub open: Option<Decimal>,
    /// 24h base volume.
    pub base_volume: Option<Decimal>,
    /// 24h quote volume.
    pub quote_volume: Option<Decimal>,
    /// Absolute 24h change.
    pub change: Option<Decimal>,
    /// 24h change in percent.
    pub percentage: Option<Decimal>,
    /// Average price.
    pub average: Option<Decimal>,
}

// =============================================================================
// Markets
// =============================================================================

/// A tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    /// Canonical symbol.
    pub symbol: CanonicalSymbol,
    /// Raw venue symbol.
    pub id: String,
    /// Base asset.
    pub base: String,
    /// Quote asset.
    pub quote: String,
    /// Currently tradable.
    pub active: bool,
    /// Price decimals.
    pub price_precision: Option<u32>,
    /// Quantity decimals.
    pub amount_precision: Option<u32>,
    /// Minimum order quantity.
    pub min_order_size: Option<Decimal>,
    /// Maximum order quantity.
    pub max_order_size: Option<Decimal>,
    /// Minimum price.
    pub min_price: Option<Decimal>,
    /// Maximum price.
    pub max_price: Option<Decimal>,
    /// Tick size as an integer count of `1 / tick_price_scale`.
    pub tick_min_move: u64,
    /// `10^digits` of the tick size.
    pub tick_price_scale: u64,
    /// Raw instrument payload.
    pub info: Value,
}

/// Result of instrument discovery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketList {
    /// Venue the list belongs to.
    pub venue: VenueId,
    /// Canonical symbols, sorted.
    pub symbols: Vec<CanonicalSymbol>,
    /// Instrument details (empty for venues without discovery).
    pub markets: Vec<Market>,
    /// Supported canonical timeframes.
    pub timeframes: Vec<Timeframe>,
}

// =============================================================================
// Stream Events
// =============================================================================

/// Stream event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Ticker update.
    Ticker,
    /// Candle update.
    Ohlcv,
    /// Order book update.
    OrderBook,
}

/// A normalized stream message delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Originating venue.
    pub venue: VenueId,
    /// Canonical symbol.
    pub symbol: CanonicalSymbol,
    /// Event category.
    pub event_type: EventType,
    /// Canonical epoch milliseconds (offset applied).
    pub timestamp: i64,
    /// Venue payload for this symbol.
    pub raw: Value,
}
