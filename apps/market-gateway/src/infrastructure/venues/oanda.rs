//! Oanda v20
//!
//! Candles come oldest-first from `/v3/instruments/{id}/candles` (mid
//! prices), bounded by an RFC 3339 `to`; the next page ends one second
//! before the oldest candle. Daily and longer series are gap-filled across
//! closed sessions. Prices are per-account, so ticker snapshots and the
//! instrument list need `OANDA_ACCOUNT_ID`; without it the static instrument
//! list is served. There is no socket stream: ticker subscriptions poll.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use rust_decimal::Decimal;
use serde_json::Value;

use super::polling::{PollingHub, TickerSource};
use super::{VenueContext, register_markets, wire};
use crate::application::gateway::{OhlcvRequest, VenueAdapter};
use crate::application::pagination::{PageOrder, PagePolicy, PageSource, RawCandle, collect_history};
use crate::application::ports::RestTransport;
use crate::domain::gaps::fill_gaps;
use crate::domain::market::{Candle, Market, MarketList, Ticker};
use crate::domain::normalizer::TickerFields;
use crate::domain::precision::{compute_precision, tick_size_for_digits};
use crate::domain::subscription::{StreamCallback, Subscription, SubscriptionId};
use crate::domain::symbol::{CanonicalSymbol, SymbolRegistry};
use crate::domain::timeframe::Timeframe;
use crate::domain::venue::{Capability, VenueDescriptor, VenueId};
use crate::error::{GatewayError, GatewayResult};

const VENUE: VenueId = VenueId::Oanda;

/// Candles per request.
pub const CANDLE_PAGE_LIMIT: usize = 5000;

/// Candles returned when the caller gives no limit.
pub const DEFAULT_CANDLES: usize = 100;

/// All-instruments polling channel.
pub const ALL_PRICES: &str = "pricing:*";

/// Oanda adapter.
#[derive(Debug)]
pub struct OandaAdapter {
    api: Arc<OandaApi>,
    poller: PollingHub,
}

impl OandaAdapter {
    /// Create the adapter. `account_id` enables pricing and instrument
    /// discovery.
    #[must_use]
    pub fn new(ctx: VenueContext, account_id: Option<String>) -> Self {
        let api = Arc::new(OandaApi {
            registry: SymbolRegistry::new(VENUE),
            account_id,
            ctx,
        });
        let poller = PollingHub::new(
            VENUE,
            api.ctx.stream.poll_interval,
            Arc::clone(&api) as Arc<dyn TickerSource>,
        );
        Self { api, poller }
    }

    /// Per-instrument polling channel.
    #[must_use]
    pub fn pricing_channel(instrument: &str) -> String {
        format!("pricing:{instrument}")
    }
}

#[async_trait]
impl VenueAdapter for OandaAdapter {
    fn descriptor(&self) -> &VenueDescriptor {
        &self.api.ctx.descriptor
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &CanonicalSymbol,
        timeframe: Timeframe,
        request: OhlcvRequest,
    ) -> GatewayResult<Vec<Candle>> {
        let ctx = &self.api.ctx;
        let limit = request.limit.unwrap_or(DEFAULT_CANDLES);
        let source = CandlePages {
            rest: ctx.rest.as_ref(),
            instrument: self.api.instrument(symbol),
            granularity: ctx.native_timeframe(timeframe)?.to_string(),
        };
        let rows = collect_history(&source, limit, ctx.venue_cursor(request.end_cursor)).await?;

        let mut candles: Vec<Candle> = rows.iter().map(|row| row.normalize(&ctx.normalizer)).collect();
        if timeframe.is_daily_or_longer() || request.fill_gaps {
            candles = fill_gaps(&candles, timeframe.duration_ms(), ctx.normalizer.offset());
        }
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_markets(&self) -> GatewayResult<MarketList> {
        let ctx = &self.api.ctx;
        let Some(account) = self.api.account_id.as_deref() else {
            let symbols = self.api.register_static();
            return Ok(MarketList {
                venue: VENUE,
                symbols,
                markets: Vec::new(),
                timeframes: ctx.descriptor.supported_timeframes(),
            });
        };

        let path = format!("/v3/accounts/{account}/instruments");
        let response = ctx.rest.get(&path, &[], &[]).await?;
        let markets = wire::array_at(VENUE, &response, "/instruments")?
            .iter()
            .map(market_from)
            .collect::<GatewayResult<Vec<_>>>()?;

        register_markets(&self.api.registry, &markets);
        Ok(ctx.market_list(markets))
    }

    async fn fetch_ticker(&self, symbol: &CanonicalSymbol) -> GatewayResult<Ticker> {
        let instrument = self.api.instrument(symbol);
        let mut ticker = self
            .api
            .pricing(std::slice::from_ref(&instrument))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::UnknownSymbol {
                venue: VENUE,
                symbol: symbol.to_string(),
            })?;
        ticker.symbol = symbol.clone();
        Ok(ticker)
    }

    async fn fetch_tickers(&self, symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>> {
        self.api.poll_tickers(symbols).await
    }

    async fn subscribe_ticker(
        &self,
        symbol: &CanonicalSymbol,
        callback: StreamCallback,
    ) -> GatewayResult<Subscription> {
        let channel = Self::pricing_channel(&self.api.instrument(symbol));
        self.poller
            .subscribe(&channel, Some(vec![symbol.clone()]), callback)
    }

    async fn subscribe_all_tickers(&self, callback: StreamCallback) -> GatewayResult<Subscription> {
        self.poller.subscribe(ALL_PRICES, None, callback)
    }

    async fn unsubscribe(&self, channel: &str, id: Option<SubscriptionId>) -> GatewayResult<bool> {
        Ok(self.poller.unsubscribe(channel, id))
    }

    async fn shutdown(&self) {
        self.poller.shutdown();
    }
}

// =============================================================================
// REST
// =============================================================================

/// REST side of the adapter, shared with the poller.
#[derive(Debug)]
struct OandaApi {
    ctx: VenueContext,
    registry: SymbolRegistry,
    account_id: Option<String>,
}

impl OandaApi {
    /// Instrument id: the registered one, else `BASE_QUOTE`.
    fn instrument(&self, symbol: &CanonicalSymbol) -> String {
        self.registry.lookup_raw(symbol).unwrap_or_else(|| {
            match (symbol.base(), symbol.quote()) {
                (Some(base), Some(quote)) => format!("{base}_{quote}"),
                _ => self.registry.raw_for(symbol),
            }
        })
    }

    fn register_static(&self) -> Vec<CanonicalSymbol> {
        let entries: Vec<(String, CanonicalSymbol)> = self
            .ctx
            .descriptor
            .static_symbols
            .iter()
            .map(|raw| (raw.clone(), CanonicalSymbol::standardize(VENUE, raw)))
            .collect();
        let mut symbols: Vec<CanonicalSymbol> = entries.iter().map(|(_, s)| s.clone()).collect();
        symbols.sort();
        self.registry.replace_all(entries);
        symbols
    }

    fn default_instruments(&self) -> Vec<String> {
        let known = self.registry.raw_symbols();
        if known.is_empty() {
            self.ctx.descriptor.static_symbols.clone()
        } else {
            known
        }
    }

    async fn pricing(&self, instruments: &[String]) -> GatewayResult<Vec<Ticker>> {
        let account = self.account_id.as_deref().ok_or(GatewayError::Unsupported {
            venue: VENUE,
            capability: Capability::FetchTickers,
        })?;
        let path = format!("/v3/accounts/{account}/pricing");
        let query = [("instruments".to_string(), instruments.join(","))];
        let response = self.ctx.rest.get(&path, &query, &[]).await?;

        wire::array_at(VENUE, &response, "/prices")?
            .iter()
            .map(|price| self.ticker_from(price))
            .collect()
    }

    fn ticker_from(&self, price: &Value) -> GatewayResult<Ticker> {
        let instrument = wire::string(VENUE, price, "instrument")?;
        let best = |side: &str| match price.pointer(&format!("/{side}/0")) {
            Some(level) => wire::opt_decimal(VENUE, level, "price"),
            None => Ok(None),
        };
        let bid = best("bids")?;
        let ask = best("asks")?;
        let mid = bid.zip(ask).map(|(bid, ask)| (bid + ask) / Decimal::TWO);

        let fields = TickerFields {
            bid,
            ask,
            last: mid,
            close: mid,
            ..TickerFields::default()
        };
        Ok(self.ctx.normalizer.normalize_ticker(
            self.registry.canonical_for(instrument),
            wire::rfc3339_millis(VENUE, price, "time")?,
            fields,
        ))
    }
}

#[async_trait]
impl TickerSource for OandaApi {
    async fn poll_tickers(&self, symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>> {
        let instruments = match symbols {
            Some(symbols) => symbols.iter().map(|s| self.instrument(s)).collect(),
            None => self.default_instruments(),
        };
        if instruments.is_empty() {
            return Ok(Vec::new());
        }
        self.pricing(&instruments).await
    }
}

fn market_from(info: &Value) -> GatewayResult<Market> {
    let name = wire::string(VENUE, info, "name")?;
    let Some((base, quote)) = name.split_once('_') else {
        return Err(GatewayError::protocol(VENUE, format!("unexpected instrument name `{name}`")));
    };
    let digits = info
        .get("displayPrecision")
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok())
        .ok_or_else(|| GatewayError::protocol(VENUE, format!("{name}: missing displayPrecision")))?;
    let precision = compute_precision(&tick_size_for_digits(digits))?;

    Ok(Market {
        symbol: CanonicalSymbol::from_parts(VENUE, base, quote),
        id: name.to_string(),
        base: base.to_string(),
        quote: quote.to_string(),
        active: true,
        price_precision: Some(digits),
        amount_precision: info
            .get("tradeUnitsPrecision")
            .and_then(Value::as_u64)
            .and_then(|d| u32::try_from(d).ok()),
        min_order_size: wire::opt_decimal(VENUE, info, "minimumTradeSize")?,
        max_order_size: wire::opt_decimal(VENUE, info, "maximumOrderUnits")?,
        min_price: None,
        max_price: None,
        tick_min_move: precision.min_move,
        tick_price_scale: precision.price_scale,
        info: info.clone(),
    })
}

// =============================================================================
// History Pages
// =============================================================================

struct CandlePages<'a> {
    rest: &'a dyn RestTransport,
    instrument: String,
    granularity: String,
}

fn rfc3339(millis: i64) -> GatewayResult<String> {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| GatewayError::protocol(VENUE, format!("cursor out of range: {millis}")))
}

fn candle_from(candle: &Value) -> GatewayResult<RawCandle> {
    let mid = candle
        .get("mid")
        .ok_or_else(|| GatewayError::protocol(VENUE, "candle without mid prices"))?;
    Ok(RawCandle {
        timestamp: wire::rfc3339_millis(VENUE, candle, "time")?,
        open: wire::decimal(VENUE, mid, "o")?,
        high: wire::decimal(VENUE, mid, "h")?,
        low: wire::decimal(VENUE, mid, "l")?,
        close: wire::decimal(VENUE, mid, "c")?,
        volume: wire::decimal(VENUE, candle, "volume")?,
    })
}

#[async_trait]
impl PageSource for CandlePages<'_> {
    fn venue(&self) -> VenueId {
        VENUE
    }

    fn policy(&self) -> PagePolicy {
        PagePolicy {
            page_limit: CANDLE_PAGE_LIMIT,
            order: PageOrder::Ascending,
        }
    }

    async fn fetch_page(&self, limit: usize, cursor: Option<i64>) -> GatewayResult<Vec<RawCandle>> {
        let mut query = vec![
            ("granularity".to_string(), self.granularity.clone()),
            ("count".to_string(), limit.to_string()),
            ("price".to_string(), "M".to_string()),
        ];
        if let Some(to) = cursor {
            query.push(("to".to_string(), rfc3339(to)?));
        }
        let path = format!("/v3/instruments/{}/candles", self.instrument);
        let response = self.rest.get(&path, &query, &[]).await?;
        wire::opt_array_at(VENUE, &response, "/candles")?
            .iter()
            .map(candle_from)
            .collect()
    }

    fn next_cursor(&self, oldest_raw_ts: i64) -> i64 {
        oldest_raw_ts - 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_renders_with_millis() {
        assert_eq!(rfc3339(1_704_412_799_000).unwrap(), "2024-01-04T23:59:59.000Z");
    }

    #[test]
    fn mid_candle_parses() {
        let candle = json!({
            "complete": true, "volume": 1234, "time": "2024-01-05T00:00:00.000000000Z",
            "mid": {"o": "1.09450", "h": "1.09700", "l": "1.09100", "c": "1.09500"}
        });
        let raw = candle_from(&candle).unwrap();
        assert_eq!(raw.timestamp, 1_704_412_800_000);
        assert_eq!(raw.close, Decimal::new(109_500, 5));
        assert_eq!(raw.volume, Decimal::new(1234, 0));

        assert!(candle_from(&json!({"time": "2024-01-05T00:00:00Z", "volume": 1})).is_err());
    }

    #[test]
    fn instrument_becomes_market() {
        let info = json!({
            "name": "USD_JPY", "type": "CURRENCY", "displayPrecision": 3,
            "tradeUnitsPrecision": 0, "minimumTradeSize": "1", "maximumOrderUnits": "100000000"
        });
        let market = market_from(&info).unwrap();

        assert_eq!(market.symbol.as_str(), "OANDA:USD/JPY");
        assert_eq!((market.tick_min_move, market.tick_price_scale), (1, 1000));
        assert_eq!(market.amount_precision, Some(0));
        assert_eq!(market.min_order_size, Some(Decimal::ONE));
    }
}
