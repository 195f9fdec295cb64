//! Configuration Module
//!
//! Environment-driven settings and the venue catalog.

mod catalog;
mod settings;

pub use catalog::VenueCatalog;
pub use settings::{ConfigError, GatewayConfig, OandaCredentials, ServerSettings, StreamSettings};
