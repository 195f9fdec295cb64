//! Tick-size precision.
//!
//! Charting clients describe price granularity as an integer `min_move`
//! over a power-of-ten `price_scale`. Both are derived from the textual
//! tick size so that trailing zeros the venue publishes (`"0.010"`) count
//! towards the scale exactly as written.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use thiserror::Error;

/// Largest number of fractional digits whose scale fits in a `u64`.
const MAX_DIGITS: u32 = 18;

/// Errors deriving precision from a tick size.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrecisionError {
    /// Text is not a decimal number.
    #[error("invalid tick size: {0:?}")]
    InvalidTickSize(String),

    /// Tick size is zero or negative.
    #[error("tick size must be positive: {0}")]
    NonPositive(String),

    /// More fractional digits than the scale can represent.
    #[error("tick size {0} has more than {MAX_DIGITS} fractional digits")]
    TooPrecise(String),
}

/// Integer description of a tick size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Precision {
    /// `round(tick_size × price_scale)`.
    pub min_move: u64,
    /// `10^precision_digits`.
    pub price_scale: u64,
    /// Fractional digits in the tick size text.
    pub precision_digits: u32,
}

/// Derive [`Precision`] from a textual tick size such as `"0.001"`.
///
/// # Errors
///
/// Returns [`PrecisionError`] if the text is not a positive decimal or has
/// more fractional digits than fit a `u64` scale.
pub fn compute_precision(tick_size: &str) -> Result<Precision, PrecisionError> {
    let text = tick_size.trim();
    let value =
        Decimal::from_str(text).map_err(|_| PrecisionError::InvalidTickSize(text.to_string()))?;
    if value <= Decimal::ZERO {
        return Err(PrecisionError::NonPositive(text.to_string()));
    }

    let fraction_len = text.split_once('.').map_or(0, |(_, fraction)| fraction.len());
    let precision_digits = u32::try_from(fraction_len)
        .ok()
        .filter(|digits| *digits <= MAX_DIGITS)
        .ok_or_else(|| PrecisionError::TooPrecise(text.to_string()))?;
    let price_scale = 10_u64.pow(precision_digits);

    let min_move = (value * Decimal::from(price_scale))
        .round()
        .to_u64()
        .ok_or_else(|| PrecisionError::TooPrecise(text.to_string()))?;

    Ok(Precision {
        min_move,
        price_scale,
        precision_digits,
    })
}

/// Tick size text for a venue that publishes precision as a digit count
/// (`5` → `"0.00001"`).
#[must_use]
pub fn tick_size_for_digits(digits: u32) -> String {
    if digits == 0 {
        return "1".to_string();
    }
    let zeros = usize::try_from(digits - 1).unwrap_or_default();
    format!("0.{}1", "0".repeat(zeros))
}
