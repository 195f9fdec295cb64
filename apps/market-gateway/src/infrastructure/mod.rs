//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete transports behind the application ports, the per-venue
//! adapters, configuration and observability.

/// Environment configuration and the venue catalog.
pub mod config;

/// reqwest REST transport.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Persistent venue streams.
pub mod stream;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;

/// Venue adapters and the gateway factory.
pub mod venues;
