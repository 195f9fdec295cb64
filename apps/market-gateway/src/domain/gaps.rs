//! Gap filling for venues that skip non-trading periods.
//!
//! When two consecutive candles are more than 1.5 intervals apart, every
//! missing sub-interval that does not fall on a UTC weekend gets a flat
//! candle at the previous close with zero volume.

use chrono::{DateTime, Datelike, Weekday};

use super::market::Candle;
use super::normalizer::TimestampOffset;

/// Insert flat candles into non-weekend gaps.
///
/// `candles` must be ascending canonical candles; `offset` is removed
/// before the weekday check so weekends are judged in UTC.
#[must_use]
pub fn fill_gaps(candles: &[Candle], interval_ms: i64, offset: TimestampOffset) -> Vec<Candle> {
    if interval_ms <= 0 || candles.len() < 2 {
        return candles.to_vec();
    }

    let mut filled = Vec::with_capacity(candles.len());
    let mut previous: Option<&Candle> = None;

    for candle in candles {
        if let Some(prev) = previous {
            // Gap threshold is 1.5 intervals; compared as 2·gap > 3·interval.
            let gap = candle.timestamp - prev.timestamp;
            if gap.saturating_mul(2) > interval_ms.saturating_mul(3) {
                let mut slot = prev.timestamp + interval_ms;
                while slot < candle.timestamp {
                    if !is_weekend(offset.remove(slot)) {
                        filled.push(Candle::flat(slot, prev.close));
                    }
                    slot += interval_ms;
                }
            }
        }
        filled.push(candle.clone());
        previous = Some(candle);
    }

    filled
}

fn is_weekend(utc_ms: i64) -> bool {
    DateTime::from_timestamp_millis(utc_ms)
        .is_some_and(|dt| matches!(dt.weekday(), Weekday::Sat | Weekday::Sun))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const DAY: i64 = 86_400_000;
    /// Thursday 2024-01-04 00:00 UTC.
    const THU: i64 = 1_704_326_400_000;

    fn candle(timestamp: i64, close: i64) -> Candle {
        Candle {
            timestamp,
            open: Decimal::new(close - 1, 0),
            high: Decimal::new(close + 1, 0),
            low: Decimal::new(close - 2, 0),
            close: Decimal::new(close, 0),
            volume: Decimal::new(10, 0),
        }
    }

    #[test]
    fn fills_only_weekdays_in_a_gap() {
        // Thursday then Sunday: Friday is missing, Saturday is weekend.
        let series = vec![candle(THU, 100), candle(THU + 3 * DAY, 105)];
        let filled = fill_gaps(&series, DAY, TimestampOffset::ZERO);

        assert_eq!(filled.len(), 3);
        assert_eq!(filled[1], Candle::flat(THU + DAY, Decimal::new(100, 0)));
        assert_eq!(filled[1].volume, Decimal::ZERO);
        assert_eq!(filled[2].timestamp, THU + 3 * DAY);
    }

    #[test]
    fn weekend_only_gap_is_left_alone() {
        // Friday then Monday.
        let fri = THU + DAY;
        let series = vec![candle(fri, 100), candle(fri + 3 * DAY, 101)];
        assert_eq!(fill_gaps(&series, DAY, TimestampOffset::ZERO), series);
    }

    #[test]
    fn weekday_check_removes_offset() {
        // Canonical timestamps shifted +7h; Friday 00:00 UTC is still Friday.
        let offset = TimestampOffset::from_hours(7);
        let shift = offset.as_millis();
        let series = vec![candle(THU + shift, 100), candle(THU + 4 * DAY + shift, 104)];

        let filled = fill_gaps(&series, DAY, offset);
        let stamps: Vec<_> = filled.iter().map(|c| c.timestamp).collect();
        // Friday inserted; Saturday and Sunday skipped; Monday is the real candle.
        assert_eq!(stamps, vec![THU + shift, THU + DAY + shift, THU + 4 * DAY + shift]);
    }

    #[test]
    fn gaps_within_threshold_are_ignored() {
        let series = vec![candle(THU, 100), candle(THU + DAY + DAY / 2, 101)];
        assert_eq!(fill_gaps(&series, DAY, TimestampOffset::ZERO).len(), 2);
    }

    #[test]
    fn multi_day_weekday_gap() {
        // Monday 2024-01-08 to Friday 2024-01-12: Tue, Wed, Thu inserted.
        let mon = THU + 4 * DAY;
        let series = vec![candle(mon, 50), candle(mon + 4 * DAY, 55)];
        let filled = fill_gaps(&series, DAY, TimestampOffset::ZERO);

        assert_eq!(filled.len(), 5);
        assert!(filled[1..4]
            .iter()
            .all(|c| c.close == Decimal::new(50, 0) && c.volume.is_zero()));
    }

    #[test]
    fn degenerate_inputs_pass_through() {
        assert!(fill_gaps(&[], DAY, TimestampOffset::ZERO).is_empty());
        let single = vec![candle(THU, 1)];
        assert_eq!(fill_gaps(&single, DAY, TimestampOffset::ZERO), single);
        let pair = vec![candle(THU, 1), candle(THU + 5 * DAY, 2)];
        assert_eq!(fill_gaps(&pair, 0, TimestampOffset::ZERO), pair);
    }
}
