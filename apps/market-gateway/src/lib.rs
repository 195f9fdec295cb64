#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Gateway - Unified Market Data Access
//!
//! One symbol space, one candle/ticker schema and one subscription model
//! over Binance USDⓈ-M futures, Bybit linear perpetuals, OKX swaps and
//! Oanda forex.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure types and rules
//!   - `symbol`: canonical `VENUE:BASE/QUOTE` symbols and the per-venue registry
//!   - `precision`: tick size → `{min_move, price_scale, digits}`
//!   - `normalizer`: timestamp offset and candle/ticker construction
//!   - `gaps`: closed-session gap filling
//!   - `subscription`: channel-keyed callback book
//!
//! - **Application**: ports and use cases
//!   - `ports`: REST and socket transport contracts
//!   - `pagination`: cursor-walking history assembly
//!   - `gateway`: the venue adapter contract and the façade
//!
//! - **Infrastructure**: adapters
//!   - `venues`: one adapter per venue, stream hub, polling fallback
//!   - `stream`: persistent reconnecting socket
//!   - `http`, `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! caller ─► Gateway ─► VenueAdapter ─► collect_history ─► RestTransport
//!                           │
//!                           └─► StreamHub ─► PersistentConnection ─► SocketTransport
//!                                   ▲                │
//!                                   └── route ◄──────┘ (frames) ─► callbacks
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure market-data types with no I/O.
pub mod domain;

/// Application layer - Ports, pagination and the gateway façade.
pub mod application;

/// Infrastructure layer - Transports, venue adapters and observability.
pub mod infrastructure;

/// Gateway error type.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Candle, EventType, Market, MarketList, StreamEvent, Ticker};
pub use domain::normalizer::{Normalizer, TimestampOffset};
pub use domain::precision::{Precision, PrecisionError, compute_precision};
pub use domain::subscription::{Subscription, SubscriptionId};
pub use domain::symbol::{CanonicalSymbol, SymbolRegistry};
pub use domain::timeframe::Timeframe;
pub use domain::venue::{Capabilities, Capability, VenueDescriptor, VenueId};

// Façade
pub use application::gateway::{Gateway, GatewayInfo, OhlcvRequest, VenueAdapter, VenueSummary};
pub use error::{GatewayError, GatewayResult};

// Configuration
pub use infrastructure::config::{
    ConfigError, GatewayConfig, OandaCredentials, ServerSettings, StreamSettings, VenueCatalog,
};

// Factory
pub use infrastructure::venues::{build_gateway, build_gateway_with};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
