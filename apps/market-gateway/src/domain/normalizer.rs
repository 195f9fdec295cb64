//! Candle and ticker normalization.
//!
//! Every timestamp the gateway emits is shifted by a fixed offset (UTC+7
//! unless configured otherwise). Values pass through unchanged; absent
//! ticker fields stay absent.

use chrono::{DateTime, SecondsFormat};
use rust_decimal::Decimal;

use super::market::{Candle, Ticker};
use super::symbol::CanonicalSymbol;

const HOUR_MS: i64 = 3_600_000;

// =============================================================================
// Timestamp Offset
// =============================================================================

/// Fixed shift applied to venue timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampOffset {
    millis: i64,
}

impl TimestampOffset {
    /// Default canonical offset (+7 hours).
    pub const DEFAULT_HOURS: i64 = 7;

    /// No shift.
    pub const ZERO: Self = Self { millis: 0 };

    /// Offset of whole hours, saturating at the `i64` millisecond range.
    #[must_use]
    pub const fn from_hours(hours: i64) -> Self {
        Self {
            millis: hours.saturating_mul(HOUR_MS),
        }
    }

    /// Offset in milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.millis
    }

    /// Venue timestamp to canonical timestamp.
    #[must_use]
    pub const fn apply(self, venue_ms: i64) -> i64 {
        venue_ms + self.millis
    }

    /// Canonical timestamp back to venue (UTC) time.
    #[must_use]
    pub const fn remove(self, canonical_ms: i64) -> i64 {
        canonical_ms - self.millis
    }
}

impl Default for TimestampOffset {
    fn default() -> Self {
        Self::from_hours(Self::DEFAULT_HOURS)
    }
}

// =============================================================================
// Ticker Fields
// =============================================================================

/// Optional ticker values extracted from a venue payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct TickerFields {
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub close: Option<Decimal>,
    pub open: Option<Decimal>,
    pub base_volume: Option<Decimal>,
    pub quote_volume: Option<Decimal>,
    pub change: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub average: Option<Decimal>,
}

// =============================================================================
// Normalizer
// =============================================================================

/// Maps venue values into canonical records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    offset: TimestampOffset,
}

impl Normalizer {
    /// Create a normalizer with the given offset.
    #[must_use]
    pub const fn new(offset: TimestampOffset) -> Self {
        Self { offset }
    }

    /// Configured offset.
    #[must_use]
    pub const fn offset(&self) -> TimestampOffset {
        self.offset
    }

    /// Venue timestamp to canonical timestamp.
    #[must_use]
    pub const fn timestamp(&self, venue_ms: i64) -> i64 {
        self.offset.apply(venue_ms)
    }

    /// Build a canonical candle.
    #[must_use]
    pub const fn normalize_candle(
        &self,
        timestamp: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Candle {
        Candle {
            timestamp: self.offset.apply(timestamp),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Build a canonical ticker.
    #[must_use]
    pub fn normalize_ticker(
        &self,
        symbol: CanonicalSymbol,
        timestamp: i64,
        fields: TickerFields,
    ) -> Ticker {
        let canonical = self.offset.apply(timestamp);
        Ticker {
            symbol,
            timestamp: canonical,
            datetime: render_datetime(canonical),
            high: fields.high,
            low: fields.low,
            bid: fields.bid,
            ask: fields.ask,
            last: fields.last,
            close: fields.close,
            open: fields.open,
            base_volume: fields.base_volume,
            quote_volume: fields.quote_volume,
            change: fields.change,
            percentage: fields.percentage,
            average: fields.average,
        }
    }
}

fn render_datetime(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
