//! Venue identity and static description.
//!
//! A [`VenueDescriptor`] is immutable configuration: URLs, the native
//! spelling of each supported timeframe, capability flags and, for venues
//! without instrument discovery, a static symbol list.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::timeframe::Timeframe;

// =============================================================================
// Venue Identifier
// =============================================================================

/// Supported venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueId {
    /// Binance USDⓈ-M perpetual futures.
    Binance,
    /// Bybit linear perpetuals.
    Bybit,
    /// OKX perpetual swaps.
    Okx,
    /// Oanda forex (v20 REST API).
    Oanda,
}

impl VenueId {
    /// Every supported venue, in catalog order.
    pub const ALL: [Self; 4] = [Self::Binance, Self::Bybit, Self::Okx, Self::Oanda];

    /// Tag used as the canonical symbol prefix (`BINANCE` in `BINANCE:BTC/USDT`).
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Binance => "BINANCE",
            Self::Bybit => "BYBIT",
            Self::Okx => "OKX",
            Self::Oanda => "OANDA",
        }
    }

    /// Lowercase label for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
            Self::Oanda => "oanda",
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for VenueId {
    type Err = String;

    /// Accepts the tag in any case, plus the product-qualified aliases
    /// (`BINANCE_FUTURE`, `BYBIT_FUTURE`, `OKX_FUTURE`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BINANCE" | "BINANCE_FUTURE" | "BINANCE_FUTURES" => Ok(Self::Binance),
            "BYBIT" | "BYBIT_FUTURE" | "BYBIT_LINEAR" => Ok(Self::Bybit),
            "OKX" | "OKX_FUTURE" | "OKX_SWAP" => Ok(Self::Okx),
            "OANDA" => Ok(Self::Oanda),
            _ => Err(s.to_string()),
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// A single optional venue capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Historical candles over REST.
    FetchOhlcv,
    /// 24h ticker snapshots over REST.
    FetchTickers,
    /// Instrument discovery.
    FetchMarkets,
    /// Per-symbol ticker stream.
    TickerStream,
    /// Every-symbol ticker stream.
    AllTickersStream,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FetchOhlcv => "fetchOHLCV",
            Self::FetchTickers => "fetchTickers",
            Self::FetchMarkets => "fetchMarkets",
            Self::TickerStream => "tickerStream",
            Self::AllTickersStream => "allTickersStream",
        };
        f.write_str(name)
    }
}

/// Capability flags for a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Historical candles available.
    pub fetch_ohlcv: bool,
    /// Ticker snapshots available.
    pub fetch_tickers: bool,
    /// Instrument discovery available.
    pub fetch_markets: bool,
    /// Native per-symbol ticker stream.
    pub ticker_stream: bool,
    /// Native all-symbol ticker stream.
    pub all_tickers_stream: bool,
    /// Ticker subscriptions served by REST polling when no stream exists.
    pub polling_fallback: bool,
}

impl Capabilities {
    /// Full REST + streaming support.
    #[must_use]
    pub const fn streaming() -> Self {
        Self {
            fetch_ohlcv: true,
            fetch_tickers: true,
            fetch_markets: true,
            ticker_stream: true,
            all_tickers_stream: true,
            polling_fallback: false,
        }
    }

    /// REST only; ticker subscriptions are polled.
    #[must_use]
    pub const fn polled() -> Self {
        Self {
            fetch_ohlcv: true,
            fetch_tickers: true,
            fetch_markets: true,
            ticker_stream: false,
            all_tickers_stream: false,
            polling_fallback: true,
        }
    }

    /// Whether the capability can be served, natively or by polling.
    #[must_use]
    pub const fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::FetchOhlcv => self.fetch_ohlcv,
            Capability::FetchTickers => self.fetch_tickers,
            Capability::FetchMarkets => self.fetch_markets,
            Capability::TickerStream => self.ticker_stream || self.polling_fallback,
            Capability::AllTickersStream => self.all_tickers_stream || self.polling_fallback,
        }
    }
}

// =============================================================================
// Venue Descriptor
// =============================================================================

/// Broad venue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    /// Crypto derivatives exchange.
    Crypto,
    /// Forex broker.
    Forex,
}

/// Static configuration for one venue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueDescriptor {
    /// Venue identifier.
    pub id: VenueId,
    /// Display name.
    pub name: String,
    /// Short display name.
    pub short_name: String,
    /// Human-readable description.
    pub description: String,
    /// Venue family.
    pub kind: VenueKind,
    /// REST base URL.
    pub rest_url: String,
    /// Stream URL (`None` when the venue has no socket stream).
    pub stream_url: Option<String>,
    /// Canonical timeframe to native granularity.
    pub timeframes: BTreeMap<Timeframe, String>,
    /// Capability flags.
    pub capabilities: Capabilities,
    /// Raw symbols for venues without usable instrument discovery.
    pub static_symbols: Vec<String>,
}

impl VenueDescriptor {
    /// Native granularity for a canonical timeframe.
    #[must_use]
    pub fn native_timeframe(&self, timeframe: Timeframe) -> Option<&str> {
        self.timeframes.get(&timeframe).map(String::as_str)
    }

    /// Canonical timeframes this venue supports, shortest first.
    #[must_use]
    pub fn supported_timeframes(&self) -> Vec<Timeframe> {
        self.timeframes.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("BINANCE", VenueId::Binance ; "tag")]
    #[test_case("binance_future", VenueId::Binance ; "lowercase alias")]
    #[test_case("BYBIT_FUTURE", VenueId::Bybit ; "bybit alias")]
    #[test_case(" okx ", VenueId::Okx ; "trimmed")]
    #[test_case("OANDA", VenueId::Oanda ; "oanda")]
    fn parses_venue_names(input: &str, expected: VenueId) {
        assert_eq!(input.parse::<VenueId>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_venue() {
        assert_eq!("KRAKEN".parse::<VenueId>().unwrap_err(), "KRAKEN");
    }

    #[test]
    fn polling_fallback_counts_as_stream_support() {
        let caps = Capabilities::polled();
        assert!(caps.supports(Capability::TickerStream));
        assert!(caps.supports(Capability::AllTickersStream));
        assert!(!caps.ticker_stream);
    }

    #[test]
    fn capability_display_uses_wire_names() {
        assert_eq!(Capability::FetchOhlcv.to_string(), "fetchOHLCV");
        assert_eq!(Capability::AllTickersStream.to_string(), "allTickersStream");
    }
}
