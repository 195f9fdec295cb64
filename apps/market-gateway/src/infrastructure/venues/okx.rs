//! OKX v5 perpetual swaps.
//!
//! `/api/v5/market/history-candles` pages 100 rows newest-first; `after` is
//! exclusive, so the next page's cursor is the oldest timestamp itself.
//! Stream subscriptions are `{channel: "tickers", instId}` args, twenty per
//! request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
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

const VENUE: VenueId = VenueId::Okx;
const INST_TYPE: &str = "SWAP";

/// Rows per history request.
pub const CANDLE_PAGE_LIMIT: usize = 100;

/// Candles returned when the caller gives no limit.
pub const DEFAULT_CANDLES: usize = 100;

/// Instruments per subscribe/unsubscribe request.
pub const TOPIC_BATCH: usize = 20;

/// All-tickers channel key.
pub const ALL_TICKERS: &str = "tickers:*";

const PING_INTERVAL: Duration = Duration::from_secs(25);

/// OKX adapter.
#[derive(Debug)]
pub struct OkxAdapter {
    ctx: VenueContext,
    registry: Arc<SymbolRegistry>,
    hub: Option<StreamHub>,
}

impl OkxAdapter {
    /// Create the adapter; the stream opens on first subscription.
    #[must_use]
    pub fn new(ctx: VenueContext) -> Self {
        let registry = Arc::new(SymbolRegistry::new(VENUE));
        let protocol = Arc::new(OkxProtocol {
            registry: Arc::clone(&registry),
            normalizer: ctx.normalizer,
        });
        let hub = ctx.stream_hub(protocol);
        Self { ctx, registry, hub }
    }

    /// Per-instrument channel key.
    #[must_use]
    pub fn ticker_channel(inst_id: &str) -> String {
        format!("tickers:{inst_id}")
    }

    /// Instrument id for a canonical symbol: the registered id, else
    /// `BASE-QUOTE-SWAP`.
    fn inst_id(&self, symbol: &CanonicalSymbol) -> String {
        self.registry.lookup_raw(symbol).unwrap_or_else(|| {
            match (symbol.base(), symbol.quote()) {
                (Some(base), Some(quote)) => format!("{base}-{quote}-{INST_TYPE}"),
                _ => self.registry.raw_for(symbol),
            }
        })
    }

    async fn get(&self, path: &str, query: &Pairs) -> GatewayResult<Value> {
        let response = self.ctx.rest.get(path, query, &[]).await?;
        check_code(&response)?;
        Ok(response)
    }

    fn ticker_from(&self, object: &Value) -> GatewayResult<Ticker> {
        let inst_id = wire::string(VENUE, object, "instId")?;
        let last = wire::opt_decimal(VENUE, object, "last")?;
        let open = wire::opt_decimal(VENUE, object, "open24h")?;
        let change = last.zip(open).map(|(last, open)| last - open);
        let fields = TickerFields {
            high: wire::opt_decimal(VENUE, object, "high24h")?,
            low: wire::opt_decimal(VENUE, object, "low24h")?,
            bid: wire::opt_decimal(VENUE, object, "bidPx")?,
            ask: wire::opt_decimal(VENUE, object, "askPx")?,
            last,
            close: last,
            open,
            base_volume: wire::opt_decimal(VENUE, object, "vol24h")?,
            quote_volume: wire::opt_decimal(VENUE, object, "volCcy24h")?,
            change,
            percentage: change
                .zip(open)
                .filter(|(_, open)| !open.is_zero())
                .map(|(change, open)| change / open * rust_decimal::Decimal::ONE_HUNDRED),
            average: None,
        };
        Ok(self.ctx.normalizer.normalize_ticker(
            canonical_for(&self.registry, inst_id),
            wire::millis(VENUE, object, "ts")?,
            fields,
        ))
    }
}

fn check_code(response: &Value) -> GatewayResult<()> {
    match response.get("code").and_then(Value::as_str) {
        Some("0") | None => Ok(()),
        Some(code) => {
            let message = response.get("msg").and_then(Value::as_str).unwrap_or("");
            Err(GatewayError::protocol(VENUE, format!("code {code}: {message}")))
        }
    }
}

fn market_from(info: &Value) -> GatewayResult<Market> {
    let inst_id = wire::string(VENUE, info, "instId")?;
    let mut parts = inst_id.split('-');
    let (Some(base), Some(quote)) = (parts.next(), parts.next()) else {
        return Err(GatewayError::protocol(VENUE, format!("unexpected instId `{inst_id}`")));
    };

    let tick_size = wire::string(VENUE, info, "tickSz")?;
    let precision = compute_precision(tick_size)?;

    Ok(Market {
        symbol: CanonicalSymbol::from_parts(VENUE, base, quote),
        id: inst_id.to_string(),
        base: base.to_string(),
        quote: quote.to_string(),
        active: info.get("state").and_then(Value::as_str) == Some("live"),
        price_precision: Some(precision.precision_digits),
        amount_precision: info
            .get("lotSz")
            .and_then(Value::as_str)
            .and_then(wire::decimal_places),
        min_order_size: wire::opt_decimal(VENUE, info, "minSz")?,
        max_order_size: wire::opt_decimal(VENUE, info, "maxLmtSz")?,
        min_price: None,
        max_price: None,
        tick_min_move: precision.min_move,
        tick_price_scale: precision.price_scale,
        info: info.clone(),
    })
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn descriptor(&self) -> &VenueDescriptor {
        &self.ctx.descriptor
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &CanonicalSymbol,
        timeframe: Timeframe,
        request: OhlcvRequest,
    ) -> GatewayResult<Vec<Candle>> {
        let source = CandlePages {
            rest: self.ctx.rest.as_ref(),
            inst_id: self.inst_id(symbol),
            bar: self.ctx.native_timeframe(timeframe)?.to_string(),
        };
        // `after` is exclusive; the requested end candle is included.
        let first_after = self
            .ctx
            .venue_cursor(request.end_cursor)
            .map(|end| end.saturating_add(1));
        let rows = collect_history(
            &source,
            request.limit.unwrap_or(DEFAULT_CANDLES),
            first_after,
        )
        .await?;
        Ok(rows.iter().map(|row| row.normalize(&self.ctx.normalizer)).collect())
    }

    async fn fetch_markets(&self) -> GatewayResult<MarketList> {
        let query = [("instType".to_string(), INST_TYPE.to_string())];
        let response = self.get("/api/v5/public/instruments", &query).await?;
        let markets = wire::array_at(VENUE, &response, "/data")?
            .iter()
            .filter(|info| info.get("state").and_then(Value::as_str) == Some("live"))
            .map(market_from)
            .collect::<GatewayResult<Vec<_>>>()?;

        register_markets(&self.registry, &markets);
        Ok(self.ctx.market_list(markets))
    }

    async fn fetch_ticker(&self, symbol: &CanonicalSymbol) -> GatewayResult<Ticker> {
        let query = [("instId".to_string(), self.inst_id(symbol))];
        let response = self.get("/api/v5/market/ticker", &query).await?;
        let object = wire::array_at(VENUE, &response, "/data")?
            .first()
            .ok_or_else(|| GatewayError::UnknownSymbol {
                venue: VENUE,
                symbol: symbol.to_string(),
            })?;
        let mut ticker = self.ticker_from(object)?;
        ticker.symbol = symbol.clone();
        Ok(ticker)
    }

    async fn fetch_tickers(&self, symbols: Option<&[CanonicalSymbol]>) -> GatewayResult<Vec<Ticker>> {
        let query = [("instType".to_string(), INST_TYPE.to_string())];
        let response = self.get("/api/v5/market/tickers", &query).await?;
        let tickers = wire::array_at(VENUE, &response, "/data")?
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
        let inst_id = self.inst_id(symbol);
        require_hub(self.hub.as_ref())?
            .subscribe(&Self::ticker_channel(&inst_id), vec![inst_id], callback)
            .await
    }

    async fn subscribe_all_tickers(&self, callback: StreamCallback) -> GatewayResult<Subscription> {
        let hub = require_hub(self.hub.as_ref())?;
        if self.registry.is_empty() {
            self.fetch_markets().await?;
        }
        hub.subscribe(ALL_TICKERS, self.registry.raw_symbols(), callback)
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

struct CandlePages<'a> {
    rest: &'a dyn RestTransport,
    inst_id: String,
    bar: String,
}

#[async_trait]
impl PageSource for CandlePages<'_> {
    fn venue(&self) -> VenueId {
        VENUE
    }

    fn policy(&self) -> PagePolicy {
        PagePolicy {
            page_limit: CANDLE_PAGE_LIMIT,
            order: PageOrder::Descending,
        }
    }

    async fn fetch_page(&self, limit: usize, cursor: Option<i64>) -> GatewayResult<Vec<RawCandle>> {
        let mut query = vec![
            ("instId".to_string(), self.inst_id.clone()),
            ("bar".to_string(), self.bar.clone()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(after) = cursor {
            query.push(("after".to_string(), after.to_string()));
        }
        let response = self.rest.get("/api/v5/market/history-candles", &query, &[]).await?;
        check_code(&response)?;
        wire::opt_array_at(VENUE, &response, "/data")?
            .iter()
            .map(|row| wire::candle_row(VENUE, row))
            .collect()
    }

    fn next_cursor(&self, oldest_raw_ts: i64) -> i64 {
        oldest_raw_ts
    }
}

/// Registered symbol, else the instrument id without its `-SWAP` suffix.
fn canonical_for(registry: &SymbolRegistry, inst_id: &str) -> CanonicalSymbol {
    registry
        .lookup_canonical(inst_id)
        .unwrap_or_else(|| registry.standardize(inst_id.trim_end_matches("-SWAP")))
}

// =============================================================================
// Stream Protocol
// =============================================================================

struct OkxProtocol {
    registry: Arc<SymbolRegistry>,
    normalizer: Normalizer,
}

impl OkxProtocol {
    fn control(op: &str, inst_ids: &[String]) -> Vec<String> {
        inst_ids
            .chunks(TOPIC_BATCH)
            .map(|batch| {
                let args: Vec<Value> = batch
                    .iter()
                    .map(|inst_id| json!({ "channel": "tickers", "instId": inst_id }))
                    .collect();
                json!({ "op": op, "args": args }).to_string()
            })
            .collect()
    }

    fn route_item(&self, item: &Value) -> Option<RoutedEvent> {
        let inst_id = item.get("instId").and_then(Value::as_str)?;
        let ts = wire::millis(VENUE, item, "ts").ok()?;
        Some(RoutedEvent {
            channels: vec![OkxAdapter::ticker_channel(inst_id), ALL_TICKERS.to_string()],
            event: StreamEvent {
                venue: VENUE,
                symbol: canonical_for(&self.registry, inst_id),
                event_type: EventType::Ticker,
                timestamp: self.normalizer.timestamp(ts),
                raw: item.clone(),
            },
        })
    }
}

impl StreamProtocol for OkxProtocol {
    fn route(&self, frame: &Value) -> Vec<RoutedEvent> {
        if frame.pointer("/arg/channel").and_then(Value::as_str) != Some("tickers") {
            return Vec::new();
        }
        frame
            .get("data")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|item| self.route_item(item)).collect())
            .unwrap_or_default()
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
            message: "ping".to_string(),
        })
    }
}
