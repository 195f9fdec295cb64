//! Binance USDⓈ-M Futures
//!
//! - Klines: `/fapi/v1/klines`, up to 1500 rows, ascending, `endTime`
//!   inclusive, next page ends 1 ms before the oldest row.
//! - Markets: `/fapi/v1/exchangeInfo`, USDT-quoted perpetuals in `TRADING`.
//! - Stream: the `!ticker@arr` firehose. One `SUBSCRIBE` turns it on; every
//!   per-symbol channel is served from it, so there is nothing to withdraw.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::hub::{RoutedEvent, StreamHub, StreamProtocol};
use super::{VenueContext, register_markets, require_hub, retain_symbols, wire};
use crate::application::gateway::{OhlcvRequest, VenueAdapter};
use crate::application::pagination::{PageOrder, PagePolicy, PageSource, RawCandle, collect_history};
use crate::application::ports::RestTransport;
use crate::domain::market::{Candle, EventType, Market, MarketList, StreamEvent, Ticker};
use crate::domain::normalizer::{Normalizer, TickerFields};
use crate::domain::precision::compute_precision;
use crate::domain::subscription::{StreamCallback, Subscription, SubscriptionId};
use crate::domain::symbol::{CanonicalSymbol, SymbolRegistry};
use crate::domain::timeframe::Timeframe;
use crate::domain::venue::{VenueDescriptor, VenueId};
use crate::error::{GatewayError, GatewayResult};

const VENUE: VenueId = VenueId::Binance;

/// Rows per klines request.
pub const KLINE_PAGE_LIMIT: usize = 1500;

/// Candles returned when the caller gives no limit.
pub const DEFAULT_CANDLES: usize = 500;

/// All-symbol ticker stream, also the all-tickers channel key.
pub const ALL_TICKERS: &str = "!ticker@arr";

/// Tick size assumed when an instrument has no `PRICE_FILTER`.
const FALLBACK_TICK_SIZE: &str = "0.01";

/// Stream names per `SUBSCRIBE` request.
const SUBSCRIBE_BATCH: usize = 100;

/// Binance adapter.
#[derive(Debug)]
pub struct BinanceAdapter {
    ctx: VenueContext,
    registry: Arc<SymbolRegistry>,
    hub: Option<StreamHub>,
}

impl BinanceAdapter {
    /// Create the adapter; the stream opens on first subscription.
    #[must_use]
    pub fn new(ctx: VenueContext) -> Self {
        let registry = Arc::new(SymbolRegistry::new(VENUE));
        let protocol = Arc::new(BinanceProtocol {
            registry: Arc::clone(&registry),
            normalizer: ctx.normalizer,
            request_id: AtomicU64::new(1),
        });
        let hub = ctx.stream_hub(protocol);
        Self { ctx, registry, hub }
    }

    /// Per-symbol channel key (`btcusdt@ticker`).
    #[must_use]
    pub fn ticker_channel(raw: &str) -> String {
        format!("{}@ticker", raw.to_lowercase())
    }

    fn ticker_from(&self, object: &Value) -> GatewayResult<Ticker> {
        let raw = wire::string(VENUE, object, "symbol")?;
        let last = wire::opt_decimal(VENUE, object, "lastPrice")?;
        let fields = TickerFields {
            high: wire::opt_decimal(VENUE, object, "highPrice")?,
            low: wire::opt_decimal(VENUE, object, "lowPrice")?,
            bid: wire::opt_decimal(VENUE, object, "bidPrice")?,
            ask: wire::opt_decimal(VENUE, object, "askPrice")?,
            last,
            close: last,
            open: wire::opt_decimal(VENUE, object, "openPrice")?,
            base_volume: wire::opt_decimal(VENUE, object, "volume")?,
            quote_volume: wire::opt_decimal(VENUE, object, "quoteVolume")?,
            change: wire::opt_decimal(VENUE, object, "priceChange")?,
            percentage: wire::opt_decimal(VENUE, object, "priceChangePercent")?,
            average: wire::opt_decimal(VENUE, object, "weightedAvgPrice")?,
        };
        Ok(self.ctx.normalizer.normalize_ticker(
            self.registry.canonical_for(raw),
            wire::millis(VENUE, object, "closeTime")?,
            fields,
        ))
    }
}

fn market_from(info: &Value) -> GatewayResult<Market> {
    let raw = wire::string(VENUE, info, "symbol")?;
    let base = wire::string(VENUE, info, "baseAsset")?;
    let quote = wire::string(VENUE, info, "quoteAsset")?;

    let filters = wire::opt_array_at(VENUE, info, "/filters")?;
    let filter = |kind: &str| {
        filters
            .iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some(kind))
    };
    let price_filter = filter("PRICE_FILTER");
    let lot_size = filter("LOT_SIZE");

    let tick_size = price_filter
        .and_then(|f| f.get("tickSize"))
        .and_then(Value::as_str)
        .unwrap_or(FALLBACK_TICK_SIZE);
    let precision = compute_precision(tick_size)?;

    let opt = |object: Option<&Value>, key: &str| match object {
        Some(object) => wire::opt_decimal(VENUE, object, key),
        None => Ok(None),
    };
    let digits = |key: &str| {
        info.get(key)
            .and_then(Value::as_u64)
            .and_then(|d| u32::try_from(d).ok())
    };

    Ok(Market {
        symbol: CanonicalSymbol::from_parts(VENUE, base, quote),
        id: raw.to_string(),
        base: base.to_string(),
        quote: quote.to_string(),
        active: info.get("status").and_then(Value::as_str) == Some("TRADING"),
        price_precision: digits("pricePrecision"),
        amount_precision: digits("quantityPrecision"),
        min_order_size: opt(lot_size, "minQty")?,
        max_order_size: opt(lot_size, "maxQty")?,
        min_price: opt(price_filter, "minPrice")?,
        max_price: opt(price_filter, "maxPrice")?,
        tick_min_move: precision.min_move,
        tick_price_scale: precision.price_scale,
        info: info.clone(),
    })
}

fn is_listed(info: &Value) -> bool {
    let field = |key: &str| info.get(key).and_then(Value::as_str);
    field("quoteAsset") == Some("USDT")
        && field("contractType") == Some("PERPETUAL")
        && field("status") == Some("TRADING")
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn descriptor(&self) -> &VenueDescriptor {
        &self.ctx.descriptor
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &CanonicalSymbol,
        timeframe: Timeframe,
        request: OhlcvRequest,
    ) -> GatewayResult<Vec<Candle>> {
        let source = KlinePages {
            rest: self.ctx.rest.as_ref(),
            symbol: self.registry.raw_for(symbol),
            interval: self.ctx.native_timeframe(timeframe)?.to_string(),
        };
        let rows = collect_history(
            &source,
            request.limit.unwrap_or(DEFAULT_CANDLES),
            self.ctx.venue_cursor(request.end_cursor),
        )
        .await?;
        Ok(rows.iter().map(|row| row.normalize(&self.ctx.normalizer)).collect())
    }

    async fn fetch_markets(&self) -> GatewayResult<MarketList> {
        let response = self.ctx.rest.get("/fapi/v1/exchangeInfo", &[], &[]).await?;
        let markets = wire::array_at(VENUE, &response, "/symbols")?
            .iter()
            .filter(|info| is_listed(info))
            .map(market_from)
            .collect::<GatewayResult<Vec<_>>>()?;

        register_markets(&self.registry, &markets);
        Ok(self.ctx.market_list(markets))
    }

    async fn fetch_ticker(&self, symbol: &CanonicalSymbol) -> GatewayResult<Ticker> {
        let query = [("symbol".to_string(), self.registry.raw_for(symbol))];
        let response = self.ctx.rest.get("/fapi/v1/ticker/24hr", &query, &[]).await?;
        let mut ticker = self.ticker_from(&response)?;
        ticker.symbol = symbol.clone();
        Ok(ticker)
    }

    async fn fetch_tickers(&self, symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>> {
        let response = self.ctx.rest.get("/fapi/v1/ticker/24hr", &[], &[]).await?;
        let tickers = wire::array_at(VENUE, &response, "")?
            .iter()
            .map(|object| self.ticker_from(object))
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(retain_symbols(tickers, symbols, |t| &t.symbol))
    }

    async fn subscribe_ticker(
        &self,
        symbol: &CanonicalSymbol,
        callback: StreamCallback,
    ) -> GatewayResult<Subscription> {
        let channel = Self::ticker_channel(&self.registry.raw_for(symbol));
        require_hub(self.hub.as_ref())?
            .subscribe(&channel, vec![ALL_TICKERS.to_string()], callback)
            .await
    }

    async fn subscribe_all_tickers(&self, callback: StreamCallback) -> GatewayResult<Subscription> {
        require_hub(self.hub.as_ref())?
            .subscribe(ALL_TICKERS, vec![ALL_TICKERS.to_string()], callback)
            .await
    }

    async fn unsubscribe(&self, channel: &str, id: Option<SubscriptionId>) -> GatewayResult<bool> {
        Ok(require_hub(self.hub.as_ref())?.unsubscribe(channel, id))
    }

    async fn shutdown(&self) {
        if let Some(hub) = &self.hub {
            hub.shutdown();
        }
    }
}

// =============================================================================
// History Pages
// =============================================================================

struct KlinePages<'a> {
    rest: &'a dyn RestTransport,
    symbol: String,
    interval: String,
}

#[async_trait]
impl PageSource for KlinePages<'_> {
    fn venue(&self) -> VenueId {
        VENUE
    }

    fn policy(&self) -> PagePolicy {
        PagePolicy {
            page_limit: KLINE_PAGE_LIMIT,
            order: PageOrder::Ascending,
        }
    }

    async fn fetch_page(&self, limit: usize, cursor: Option<i64>) -> GatewayResult<Vec<RawCandle>> {
        let mut query = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("interval".to_string(), self.interval.clone()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(end) = cursor {
            query.push(("endTime".to_string(), end.to_string()));
        }
        let response = self.rest.get("/fapi/v1/klines", &query, &[]).await?;
        wire::array_at(VENUE, &response, "")?
            .iter()
            .map(|row| wire::candle_row(VENUE, row))
            .collect()
    }

    fn next_cursor(&self, oldest_raw_ts: i64) -> i64 {
        oldest_raw_ts - 1
    }
}

// =============================================================================
// Stream Protocol
// =============================================================================

struct BinanceProtocol {
    registry: Arc<SymbolRegistry>,
    normalizer: Normalizer,
    request_id: AtomicU64,
}

impl BinanceProtocol {
    fn route_item(&self, item: &Value) -> Option<RoutedEvent> {
        if item.get("e").and_then(Value::as_str) != Some("24hrTicker") {
            return None;
        }
        let raw = item.get("s").and_then(Value::as_str)?;
        let event_time = item.get("E").and_then(Value::as_i64)?;
        Some(RoutedEvent {
            channels: vec![BinanceAdapter::ticker_channel(raw), ALL_TICKERS.to_string()],
            event: StreamEvent {
                venue: VENUE,
                symbol: self.registry.canonical_for(raw),
                event_type: EventType::Ticker,
                timestamp: self.normalizer.timestamp(event_time),
                raw: item.clone(),
            },
        })
    }
}

impl StreamProtocol for BinanceProtocol {
    fn route(&self, frame: &Value) -> Vec<RoutedEvent> {
        let payload = frame.get("data").unwrap_or(frame);
        match payload {
            Value::Array(items) => items.iter().filter_map(|item| self.route_item(item)).collect(),
            Value::Object(_) => self.route_item(payload).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn subscribe_messages(&self, topics: &[String]) -> Vec<String> {
        topics
            .chunks(SUBSCRIBE_BATCH)
            .map(|batch| {
                json!({
                    "method": "SUBSCRIBE",
                    "params": batch,
                    "id": self.request_id.fetch_add(1, Ordering::Relaxed),
                })
                .to_string()
            })
            .collect()
    }

    fn unsubscribe_messages(&self, _topics: &[String]) -> Vec<String> {
        Vec::new()
    }
}
