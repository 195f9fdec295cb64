//! Domain Layer - Canonical market data types and pure transformations.
//!
//! Nothing in this layer performs I/O. Venue adapters translate wire
//! payloads into these types; the gateway hands them to callers.

/// Venue identifiers, descriptors and capability flags.
pub mod venue;

/// Canonical symbols and the per-venue symbol registry.
pub mod symbol;

/// Tick-size precision derivation.
pub mod precision;

/// Canonical timeframes.
pub mod timeframe;

/// Candles, tickers, markets and stream events.
pub mod market;

/// Timestamp offset and candle/ticker normalization.
pub mod normalizer;

/// Synthetic candle insertion for non-weekend gaps.
pub mod gaps;

/// Stream subscription book (channel keys to callbacks).
pub mod subscription;
