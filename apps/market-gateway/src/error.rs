//! Gateway error type.
//!
//! Every public gateway operation returns [`GatewayError`]. Layer-specific
//! errors convert into it with `?`.

use crate::application::ports::TransportError;
use crate::domain::precision::PrecisionError;
use crate::domain::venue::{Capability, VenueId};
use crate::infrastructure::stream::StreamError;

/// Errors surfaced by gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP or socket transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The venue answered with something the adapter could not interpret.
    #[error("unexpected response from {venue}: {message}")]
    UpstreamProtocol {
        /// Venue that answered.
        venue: VenueId,
        /// What was wrong with the payload.
        message: String,
    },

    /// No adapter registered under this name.
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// Symbol does not belong to the venue or is not listed.
    #[error("unknown symbol {symbol} on {venue}")]
    UnknownSymbol {
        /// Venue queried.
        venue: VenueId,
        /// Symbol as supplied.
        symbol: String,
    },

    /// The venue lacks a capability.
    #[error("{venue} does not support {capability}")]
    Unsupported {
        /// Venue queried.
        venue: VenueId,
        /// Missing capability.
        capability: Capability,
    },

    /// The venue has no native granularity for this timeframe.
    #[error("timeframe {timeframe} is not available on {venue}")]
    UnsupportedTimeframe {
        /// Venue queried.
        venue: VenueId,
        /// Timeframe as supplied.
        timeframe: String,
    },

    /// Invalid tick size in instrument data.
    #[error(transparent)]
    Precision(#[from] PrecisionError),

    /// Stream connection failure.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl GatewayError {
    /// Shorthand for [`GatewayError::UpstreamProtocol`].
    pub fn protocol(venue: VenueId, message: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            venue,
            message: message.into(),
        }
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
