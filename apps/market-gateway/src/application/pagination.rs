//! History Pagination
//!
//! Venues cap how many candles one REST call returns. [`collect_history`]
//! walks backward from a cursor, one bounded page at a time, and assembles
//! an ascending, deduplicated series of at most the requested length.
//!
//! Venues differ only in their [`PagePolicy`] (page size cap, native row
//! order) and in how the next cursor is derived from the oldest row of the
//! previous page; both are supplied by the [`PageSource`].
//!
//! Pages are fetched strictly one after another: each cursor depends on the
//! previous page. Any transport failure aborts the whole fetch.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::market::Candle;
use crate::domain::normalizer::Normalizer;
use crate::domain::venue::VenueId;
use crate::error::GatewayResult;
use crate::infrastructure::metrics;

// =============================================================================
// Types
// =============================================================================

/// One candle as the venue reported it (venue timestamp, no offset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandle {
    /// Venue epoch milliseconds.
    pub timestamp: i64,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume.
    pub volume: Decimal,
}

impl RawCandle {
    /// Apply the normalizer's offset.
    #[must_use]
    pub const fn normalize(&self, normalizer: &Normalizer) -> Candle {
        normalizer.normalize_candle(
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }
}

/// Row order of a venue's history pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrder {
    /// Oldest row first.
    Ascending,
    /// Newest row first.
    Descending,
}

/// Venue paging limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    /// Maximum rows per request.
    pub page_limit: usize,
    /// Native row order.
    pub order: PageOrder,
}

/// A venue history endpoint, already bound to one symbol and timeframe.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Venue for logging and metrics.
    fn venue(&self) -> VenueId;

    /// Paging limits.
    fn policy(&self) -> PagePolicy;

    /// Fetch up to `limit` rows ending at `cursor` (`None` = now).
    async fn fetch_page(&self, limit: usize, cursor: Option<i64>) -> GatewayResult<Vec<RawCandle>>;

    /// Cursor for the page preceding one whose oldest row is `oldest_raw_ts`.
    fn next_cursor(&self, oldest_raw_ts: i64) -> i64;
}

// =============================================================================
// Engine
// =============================================================================

/// Collect up to `requested` candles ending at `end_cursor`, oldest first.
///
/// Stops early on an empty page, a short page, or once enough rows are
/// assembled. The result holds the newest `requested` rows.
///
/// # Errors
///
/// Propagates the first page failure.
pub async fn collect_history<S: PageSource + ?Sized>(
    source: &S,
    requested: usize,
    end_cursor: Option<i64>,
) -> GatewayResult<Vec<RawCandle>> {
    let policy = source.policy();
    let venue = source.venue();
    let page_limit = policy.page_limit.max(1);

    let mut remaining = requested;
    let mut cursor = end_cursor;
    let mut assembled: Vec<RawCandle> = Vec::new();
    let mut pages = 0_usize;

    while remaining > 0 {
        let limit = remaining.min(page_limit);
        let mut page = source.fetch_page(limit, cursor).await?;
        pages += 1;
        metrics::record_history_page(venue);

        if page.is_empty() {
            debug!(venue = %venue, pages, "history exhausted");
            break;
        }

        if policy.order == PageOrder::Descending {
            page.reverse();
        }

        let received = page.len();
        let oldest = page[0].timestamp;
        page.append(&mut assembled);
        assembled = page;

        if received < limit {
            debug!(venue = %venue, received, limit, "short page, no older history");
            break;
        }

        remaining = remaining.saturating_sub(received);
        cursor = Some(source.next_cursor(oldest));

        if assembled.len() >= requested {
            break;
        }
    }

    assembled.sort_by_key(|candle| candle.timestamp);
    assembled.dedup_by_key(|candle| candle.timestamp);
    let overshoot = assembled.len().saturating_sub(requested);
    assembled.drain(..overshoot);

    debug!(venue = %venue, pages, candles = assembled.len(), "history assembled");
    Ok(assembled)
}
