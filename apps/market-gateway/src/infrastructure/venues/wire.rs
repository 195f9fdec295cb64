//! Field extraction from venue JSON.
//!
//! Venues send numbers as JSON strings, JSON numbers, or empty strings for
//! "not available". These helpers turn that into typed values and report
//! anything else as an upstream protocol error naming the field.

use std::str::FromStr;

use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::application::pagination::RawCandle;
use crate::domain::venue::VenueId;
use crate::error::{GatewayError, GatewayResult};

/// Parse decimal text, accepting exponent notation (`1e-8`).
#[must_use]
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

/// Required decimal field.
///
/// # Errors
///
/// Missing or non-numeric fields.
pub fn decimal(venue: VenueId, object: &Value, key: &str) -> GatewayResult<Decimal> {
    let value = object
        .get(key)
        .ok_or_else(|| GatewayError::protocol(venue, format!("missing field `{key}`")))?;
    value_to_decimal(value)
        .ok_or_else(|| GatewayError::protocol(venue, format!("field `{key}` is not numeric: {value}")))
}

/// Optional decimal field: absent, `null` and `""` are `None`.
///
/// # Errors
///
/// Present but non-numeric fields.
pub fn opt_decimal(venue: VenueId, object: &Value, key: &str) -> GatewayResult<Option<Decimal>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => value_to_decimal(value).map(Some).ok_or_else(|| {
            GatewayError::protocol(venue, format!("field `{key}` is not numeric: {value}"))
        }),
    }
}

/// Epoch milliseconds from a JSON number or numeric string.
///
/// # Errors
///
/// Missing or non-integer fields.
pub fn millis(venue: VenueId, object: &Value, key: &str) -> GatewayResult<i64> {
    let value = object
        .get(key)
        .ok_or_else(|| GatewayError::protocol(venue, format!("missing field `{key}`")))?;
    millis_value(value)
        .ok_or_else(|| GatewayError::protocol(venue, format!("field `{key}` is not a timestamp: {value}")))
}

fn millis_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339 timestamp (`2024-01-05T00:00:00.000000000Z`) to epoch milliseconds.
///
/// # Errors
///
/// Missing or unparseable fields.
pub fn rfc3339_millis(venue: VenueId, object: &Value, key: &str) -> GatewayResult<i64> {
    let text = string(venue, object, key)?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| GatewayError::protocol(venue, format!("field `{key}` is not RFC 3339: {e}")))
}

/// Required string field.
///
/// # Errors
///
/// Missing or non-string fields.
pub fn string<'a>(venue: VenueId, object: &'a Value, key: &str) -> GatewayResult<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::protocol(venue, format!("missing string field `{key}`")))
}

/// Required array at a JSON pointer (`/result/list`).
///
/// # Errors
///
/// Missing or non-array values.
pub fn array_at<'a>(venue: VenueId, root: &'a Value, pointer: &str) -> GatewayResult<&'a [Value]> {
    root.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| GatewayError::protocol(venue, format!("expected an array at `{pointer}`")))
}

/// Array at a JSON pointer; absent or `null` is empty.
///
/// # Errors
///
/// Present values that are not arrays.
pub fn opt_array_at<'a>(venue: VenueId, root: &'a Value, pointer: &str) -> GatewayResult<&'a [Value]> {
    match root.pointer(pointer) {
        None | Some(Value::Null) => Ok(&[]),
        Some(_) => array_at(venue, root, pointer),
    }
}

/// `[ts, open, high, low, close, volume, ...]` row.
///
/// # Errors
///
/// Short rows and non-numeric cells.
pub fn candle_row(venue: VenueId, row: &Value) -> GatewayResult<RawCandle> {
    let cells = row
        .as_array()
        .filter(|cells| cells.len() >= 6)
        .ok_or_else(|| GatewayError::protocol(venue, format!("malformed candle row: {row}")))?;

    let timestamp = millis_value(&cells[0])
        .ok_or_else(|| GatewayError::protocol(venue, format!("bad candle timestamp: {}", cells[0])))?;
    let cell = |index: usize| {
        value_to_decimal(&cells[index]).ok_or_else(|| {
            GatewayError::protocol(venue, format!("bad candle value: {}", cells[index]))
        })
    };

    Ok(RawCandle {
        timestamp,
        open: cell(1)?,
        high: cell(2)?,
        low: cell(3)?,
        close: cell(4)?,
        volume: cell(5)?,
    })
}

/// Decimal places in a step such as `"0.001"` (trailing zeros count).
#[must_use]
pub fn decimal_places(step: &str) -> Option<u32> {
    let step = step.trim();
    parse_decimal(step)?;
    Some(
        step.split_once('.')
            .map_or(0, |(_, fraction)| u32::try_from(fraction.len()).unwrap_or(u32::MAX)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    const V: VenueId = VenueId::Bybit;

    #[test]
    fn decimals_from_strings_and_numbers() {
        let object = json!({"a": "0.0010", "b": 42, "c": 1.5, "d": "1e-8"});
        assert_eq!(decimal(V, &object, "a").unwrap(), Decimal::new(10, 4));
        assert_eq!(decimal(V, &object, "b").unwrap(), Decimal::new(42, 0));
        assert_eq!(decimal(V, &object, "c").unwrap(), Decimal::new(15, 1));
        assert_eq!(decimal(V, &object, "d").unwrap(), Decimal::new(1, 8));
    }

    #[test]
    fn missing_decimal_is_a_protocol_error() {
        let err = decimal(V, &json!({}), "lastPrice").unwrap_err();
        assert!(err.to_string().contains("lastPrice"));
    }

    #[test]
    fn optional_decimals_keep_zero_and_drop_blanks() {
        let object = json!({"zero": "0", "blank": "", "null": null, "bad": "n/a"});
        assert_eq!(opt_decimal(V, &object, "zero").unwrap(), Some(Decimal::ZERO));
        assert_eq!(opt_decimal(V, &object, "blank").unwrap(), None);
        assert_eq!(opt_decimal(V, &object, "null").unwrap(), None);
        assert_eq!(opt_decimal(V, &object, "absent").unwrap(), None);
        assert!(opt_decimal(V, &object, "bad").is_err());
    }

    #[test]
    fn millis_accepts_number_or_string() {
        let object = json!({"n": 1_700_000_000_000_i64, "s": "1700000000000"});
        assert_eq!(millis(V, &object, "n").unwrap(), 1_700_000_000_000);
        assert_eq!(millis(V, &object, "s").unwrap(), 1_700_000_000_000);
    }

    #[test]
    fn rfc3339_with_nanoseconds() {
        let object = json!({"time": "2024-01-05T00:00:00.000000000Z"});
        assert_eq!(rfc3339_millis(V, &object, "time").unwrap(), 1_704_412_800_000);
    }

    #[test]
    fn candle_rows_parse_mixed_cells() {
        let row = json!([1_700_000_000_000_i64, "1.0", "2.0", "0.5", "1.5", "100", "ignored"]);
        let candle = candle_row(V, &row).unwrap();
        assert_eq!(candle.timestamp, 1_700_000_000_000);
        assert_eq!(candle.high, Decimal::new(20, 1));
        assert_eq!(candle.volume, Decimal::new(100, 0));

        assert!(candle_row(V, &json!(["1", "2"])).is_err());
    }

    #[test]
    fn arrays_by_pointer() {
        let root = json!({"result": {"list": [1, 2]}, "data": null});
        assert_eq!(array_at(V, &root, "/result/list").unwrap().len(), 2);
        assert!(array_at(V, &root, "/result/missing").is_err());
        assert!(opt_array_at(V, &root, "/data").unwrap().is_empty());
    }

    #[test_case("0.001", Some(3))]
    #[test_case("1", Some(0))]
    #[test_case("0.10", Some(2))]
    #[test_case("abc", None)]
    fn step_decimal_places(step: &str, expected: Option<u32>) {
        assert_eq!(decimal_places(step), expected);
    }
}
