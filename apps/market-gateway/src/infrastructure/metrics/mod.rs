//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **REST**: requests by venue and outcome, request latency, history pages
//! - **Streams**: frames received, events dispatched, reconnect attempts
//! - **State**: connection state and active subscription channels per venue
//!
//! Recording functions are no-ops until [`init_metrics`] installs the
//! recorder, so library users and tests need no setup.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::warn;

use crate::domain::venue::VenueId;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter configuration rejected.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Another global recorder is already installed.
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder.
///
/// With a non-zero `port` the exporter also serves `/metrics` on
/// `0.0.0.0:port`; this must run inside a Tokio runtime. Calling again
/// after a successful install is a no-op.
///
/// # Errors
///
/// Returns [`MetricsError`] if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<(), MetricsError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    let handle = if port == 0 {
        builder.install_recorder()?
    } else {
        let (recorder, exporter) = builder
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .build()?;
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                warn!(error = ?e, "metrics exporter stopped");
            }
        });
        handle
    };

    register_metrics();
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}

/// Prometheus handle for rendering, once initialized.
#[must_use]
pub fn metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_gateway_rest_requests_total",
        "REST requests issued to venues by outcome"
    );
    describe_histogram!(
        "market_gateway_rest_request_seconds",
        "REST request latency"
    );
    describe_counter!(
        "market_gateway_history_pages_total",
        "History pages fetched while assembling candle series"
    );

    describe_counter!(
        "market_gateway_stream_frames_total",
        "Frames received on venue streams"
    );
    describe_counter!(
        "market_gateway_stream_events_dispatched_total",
        "Stream events delivered to subscriber callbacks"
    );
    describe_counter!(
        "market_gateway_reconnects_total",
        "Stream reconnection attempts"
    );

    describe_gauge!(
        "market_gateway_connection_state",
        "Stream connection state (0 disconnected, 1 connecting, 2 connected, 3 reconnecting, 4 closed)"
    );
    describe_gauge!(
        "market_gateway_subscriptions",
        "Active subscription channels"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// REST request outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// 2xx with a decodable body.
    Success,
    /// Any transport or protocol failure.
    Failure,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record one REST request.
pub fn record_rest_request(venue: VenueId, outcome: RequestOutcome, elapsed: Duration) {
    counter!(
        "market_gateway_rest_requests_total",
        "venue" => venue.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "market_gateway_rest_request_seconds",
        "venue" => venue.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// Record one history page.
pub fn record_history_page(venue: VenueId) {
    counter!("market_gateway_history_pages_total", "venue" => venue.as_str()).increment(1);
}

/// Record one inbound stream frame.
pub fn record_stream_frame(venue: VenueId) {
    counter!("market_gateway_stream_frames_total", "venue" => venue.as_str()).increment(1);
}

/// Record callbacks invoked for stream events.
pub fn record_events_dispatched(venue: VenueId, count: usize) {
    counter!(
        "market_gateway_stream_events_dispatched_total",
        "venue" => venue.as_str()
    )
    .increment(count as u64);
}

/// Record a reconnect attempt.
pub fn record_reconnect(venue: VenueId) {
    counter!("market_gateway_reconnects_total", "venue" => venue.as_str()).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(venue: VenueId, state_code: u8) {
    gauge!("market_gateway_connection_state", "venue" => venue.as_str())
        .set(f64::from(state_code));
}

/// Update the active subscription channel gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(venue: VenueId, channels: usize) {
    gauge!("market_gateway_subscriptions", "venue" => venue.as_str()).set(channels as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_rest_request(VenueId::Okx, RequestOutcome::Failure, Duration::from_millis(5));
        record_history_page(VenueId::Okx);
        record_events_dispatched(VenueId::Binance, 3);
        set_connection_state(VenueId::Bybit, 2);
        set_subscriptions(VenueId::Oanda, 1);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(RequestOutcome::Success.as_str(), "success");
        assert_eq!(RequestOutcome::Failure.as_str(), "failure");
    }
}
