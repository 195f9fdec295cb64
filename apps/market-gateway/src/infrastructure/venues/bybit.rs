//! Bybit v5, linear category.
//!
//! History comes newest-first from `/v5/market/kline` with an inclusive
//! `end`; the stream uses explicit `tickers.<SYMBOL>` topics requested ten
//! at a time and withdrawn when no channel needs them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::hub::{RoutedEvent, StreamHub, StreamProtocol};
use super::{VenueContext, register_markets, require_hub, retain_symbols, wire};
use crate::application::gateway::{OhlcvRequest, VenueAdapter};
use crate::application::pagination::{PageOrder, PagePolicy, PageSource, RawCandle, collect_history};
use crate::application::ports::{Pairs, RestTransport};
use crate::domain::market::{Candle, EventType, Market, MarketList, StreamEvent, Ticker};
use crate::domain::normalizer::{Normalizer, TickerFields};
use crate::domain::precision::compute_precision;
use crate::domain::subscription::{StreamCallback, Subscription, SubscriptionId};
use crate::domain::symbol::{CanonicalSymbol, SymbolRegistry};
use crate::domain::timeframe::Timeframe;
use crate::domain::venue::{VenueDescriptor, VenueId};
use crate::error::{GatewayError, GatewayResult};
use crate::infrastructure::stream::Heartbeat;

const VENUE: VenueId = VenueId::Bybit;
const CATEGORY: &str = "linear";

/// Rows per kline request.
pub const KLINE_PAGE_LIMIT: usize = 1000;

/// Candles returned when the caller gives no limit.
pub const DEFAULT_CANDLES: usize = 200;

/// Topics per subscribe/unsubscribe request.
pub const TOPIC_BATCH: usize = 10;

/// All-tickers channel key.
pub const ALL_TICKERS: &str = "tickers.*";

const INSTRUMENTS_PAGE: &str = "1000";
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Bybit adapter.
#[derive(Debug)]
pub struct BybitAdapter {
    ctx: VenueContext,
    registry: Arc<SymbolRegistry>,
    hub: Option<StreamHub>,
}

impl BybitAdapter {
    /// Create the adapter; the stream opens on first subscription.
    #[must_use]
    pub fn new(ctx: VenueContext) -> Self {
        let registry = Arc::new(SymbolRegistry::new(VENUE));
        let protocol = Arc::new(BybitProtocol {
            registry: Arc::clone(&registry),
            normalizer: ctx.normalizer,
        });
        let hub = ctx.stream_hub(protocol);
        Self { ctx, registry, hub }
    }

    /// Ticker topic, also the per-symbol channel key.
    #[must_use]
    pub fn ticker_topic(raw: &str) -> String {
        format!("tickers.{raw}")
    }

    async fn get(&self, path: &str, query: &Pairs) -> GatewayResult<Value> {
        let response = self.ctx.rest.get(path, query, &[]).await?;
        check_ret_code(&response)?;
        Ok(response)
    }

    async fn fetch_tickers_raw(&self, symbol: Option<String>) -> GatewayResult<Vec<Ticker>> {
        let mut query = vec![("category".to_string(), CATEGORY.to_string())];
        if let Some(symbol) = symbol {
            query.push(("symbol".to_string(), symbol));
        }
        let response = self.get("/v5/market/tickers", &query).await?;
        let time = wire::millis(VENUE, &response, "time")?;
        wire::array_at(VENUE, &response, "/result/list")?
            .iter()
            .map(|object| self.ticker_from(object, time))
            .collect()
    }

    fn ticker_from(&self, object: &Value, time: i64) -> GatewayResult<Ticker> {
        let raw = wire::string(VENUE, object, "symbol")?;
        let last = wire::opt_decimal(VENUE, object, "lastPrice")?;
        let open = wire::opt_decimal(VENUE, object, "prevPrice24h")?;
        let fields = TickerFields {
            high: wire::opt_decimal(VENUE, object, "highPrice24h")?,
            low: wire::opt_decimal(VENUE, object, "lowPrice24h")?,
            bid: wire::opt_decimal(VENUE, object, "bid1Price")?,
            ask: wire::opt_decimal(VENUE, object, "ask1Price")?,
            last,
            close: last,
            open,
            base_volume: wire::opt_decimal(VENUE, object, "volume24h")?,
            quote_volume: wire::opt_decimal(VENUE, object, "turnover24h")?,
            change: last.zip(open).map(|(last, open)| last - open),
            percentage: wire::opt_decimal(VENUE, object, "price24hPcnt")?
                .map(|fraction| fraction * Decimal::ONE_HUNDRED),
            average: None,
        };
        Ok(self
            .ctx
            .normalizer
            .normalize_ticker(self.registry.canonical_for(raw), time, fields))
    }

    async fn ticker_topics(&self) -> GatewayResult<Vec<String>> {
        if self.registry.is_empty() {
            self.fetch_markets().await?;
        }
        Ok(self
            .registry
            .raw_symbols()
            .iter()
            .map(|raw| Self::ticker_topic(raw))
            .collect())
    }
}

fn check_ret_code(response: &Value) -> GatewayResult<()> {
    match response.get("retCode").and_then(Value::as_i64) {
        Some(0) | None => Ok(()),
        Some(code) => {
            let message = response.get("retMsg").and_then(Value::as_str).unwrap_or("");
            Err(GatewayError::protocol(VENUE, format!("retCode {code}: {message}")))
        }
    }
}

/// Trading perpetuals only; dated futures share the perpetual's coins.
fn is_listed(info: &Value) -> bool {
    let field = |key: &str| info.get(key).and_then(Value::as_str);
    field("contractType") == Some("LinearPerpetual") && field("status") == Some("Trading")
}

fn market_from(info: &Value) -> GatewayResult<Market> {
    let raw = wire::string(VENUE, info, "symbol")?;
    let base = wire::string(VENUE, info, "baseCoin")?;
    let quote = wire::string(VENUE, info, "quoteCoin")?;
    let price_filter = info.get("priceFilter").unwrap_or(&Value::Null);
    let lot_size = info.get("lotSizeFilter").unwrap_or(&Value::Null);

    let tick_size = wire::string(VENUE, price_filter, "tickSize")?;
    let precision = compute_precision(tick_size)?;

    Ok(Market {
        symbol: CanonicalSymbol::from_parts(VENUE, base, quote),
        id: raw.to_string(),
        base: base.to_string(),
        quote: quote.to_string(),
        active: info.get("status").and_then(Value::as_str) == Some("Trading"),
        price_precision: info
            .get("priceScale")
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()))
            .and_then(|d| u32::try_from(d).ok())
            .or(Some(precision.precision_digits)),
        amount_precision: lot_size
            .get("qtyStep")
            .and_then(Value::as_str)
            .and_then(wire::decimal_places),
        min_order_size: wire::opt_decimal(VENUE, lot_size, "minOrderQty")?,
        max_order_size: wire::opt_decimal(VENUE, lot_size, "maxOrderQty")?,
        min_price: wire::opt_decimal(VENUE, price_filter, "minPrice")?,
        max_price: wire::opt_decimal(VENUE, price_filter, "maxPrice")?,
        tick_min_move: precision.min_move,
        tick_price_scale: precision.price_scale,
        info: info.clone(),
    })
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
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
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let mut query = vec![
                ("category".to_string(), CATEGORY.to_string()),
                ("limit".to_string(), INSTRUMENTS_PAGE.to_string()),
            ];
            if let Some(cursor) = &cursor {
                query.push(("cursor".to_string(), cursor.clone()));
            }
            let response = self.get("/v5/market/instruments-info", &query).await?;
            for info in wire::array_at(VENUE, &response, "/result/list")? {
                if is_listed(info) {
                    markets.push(market_from(info)?);
                }
            }

            match response.pointer("/result/nextPageCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() && seen.insert(next.to_string()) => {
                    cursor = Some(next.to_string());
                }
                _ => break,
            }
        }

        register_markets(&self.registry, &markets);
        Ok(self.ctx.market_list(markets))
    }

    async fn fetch_ticker(&self, symbol: &CanonicalSymbol) -> GatewayResult<Ticker> {
        let mut tickers = self.fetch_tickers_raw(Some(self.registry.raw_for(symbol))).await?;
        if tickers.is_empty() {
            return Err(GatewayError::UnknownSymbol {
                venue: VENUE,
                symbol: symbol.to_string(),
            });
        }
        let mut ticker = tickers.swap_remove(0);
        ticker.symbol = symbol.clone();
        Ok(ticker)
    }

    async fn fetch_tickers(&self, symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>> {
        let tickers = self.fetch_tickers_raw(None).await?;
        Ok(retain_symbols(tickers, symbols, |t| &t.symbol))
    }

    async fn subscribe_ticker(
        &self,
        symbol: &CanonicalSymbol,
        callback: StreamCallback,
    ) -> GatewayResult<Subscription> {
        let topic = Self::ticker_topic(&self.registry.raw_for(symbol));
        require_hub(self.hub.as_ref())?
            .subscribe(&topic, vec![topic.clone()], callback)
            .await
    }

    async fn subscribe_all_tickers(&self, callback: StreamCallback) -> GatewayResult<Subscription> {
        let hub = require_hub(self.hub.as_ref())?;
        let topics = self.ticker_topics().await?;
        hub.subscribe(ALL_TICKERS, topics, callback).await
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
            order: PageOrder::Descending,
        }
    }

    async fn fetch_page(&self, limit: usize, cursor: Option<i64>) -> GatewayResult<Vec<RawCandle>> {
        let mut query = vec![
            ("category".to_string(), CATEGORY.to_string()),
            ("symbol".to_string(), self.symbol.clone()),
            ("interval".to_string(), self.interval.clone()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(end) = cursor {
            query.push(("end".to_string(), end.to_string()));
        }
        let response = self.rest.get("/v5/market/kline", &query, &[]).await?;
        check_ret_code(&response)?;
        wire::opt_array_at(VENUE, &response, "/result/list")?
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

struct BybitProtocol {
    registry: Arc<SymbolRegistry>,
    normalizer: Normalizer,
}

impl BybitProtocol {
    fn control(op: &str, topics: &[String]) -> Vec<String> {
        topics
            .chunks(TOPIC_BATCH)
            .map(|batch| json!({ "op": op, "args": batch }).to_string())
            .collect()
    }
}

impl StreamProtocol for BybitProtocol {
    fn route(&self, frame: &Value) -> Vec<RoutedEvent> {
        let Some(topic) = frame.get("topic").and_then(Value::as_str) else {
            return Vec::new();
        };
        let Some(raw) = topic.strip_prefix("tickers.") else {
            return Vec::new();
        };
        let Some(ts) = frame.get("ts").and_then(Value::as_i64) else {
            return Vec::new();
        };
        vec![RoutedEvent {
            channels: vec![topic.to_string(), ALL_TICKERS.to_string()],
            event: StreamEvent {
                venue: VENUE,
                symbol: self.registry.canonical_for(raw),
                event_type: EventType::Ticker,
                timestamp: self.normalizer.timestamp(ts),
                raw: frame.clone(),
            },
        }]
    }

    fn subscribe_messages(&self, topics: &[String]) -> Vec<String> {
        Self::control("subscribe", topics)
    }

    fn unsubscribe_messages(&self, topics: &[String]) -> Vec<String> {
        Self::control("unsubscribe", topics)
    }

    fn heartbeat(&self) -> Option<Heartbeat> {
        Some(Heartbeat {
            interval: PING_INTERVAL,
            message: json!({ "op": "ping" }).to_string(),
        })
    }
}
