//! Application Layer - Ports and use cases.
//!
//! Defines the transport contracts, the shared pagination engine and the
//! gateway façade that dispatches calls to venue adapters.

/// Port interfaces for transports.
pub mod ports;

/// Cursor-based history pagination.
pub mod pagination;

/// Venue adapter contract and the gateway façade.
pub mod gateway;
