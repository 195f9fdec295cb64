//! Market Gateway Binary
//!
//! Registers the configured venues, warms their symbol registries and
//! serves Prometheus metrics until shut down.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_VENUES`: comma-separated venues (default: all four)
//! - `GATEWAY_TIMESTAMP_OFFSET_HOURS`: canonical timestamp offset (default: 7)
//! - `GATEWAY_METRICS_PORT`: Prometheus port, 0 disables (default: 9090)
//! - `GATEWAY_RESUBSCRIBE_ON_RECONNECT`: replay topics after reconnect (default: false)
//! - `OANDA_API_TOKEN`, `OANDA_ACCOUNT_ID`: Oanda credentials
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log filter (default: `market_gateway=info`)

use anyhow::Context;
use market_gateway::infrastructure::telemetry;
use market_gateway::{Gateway, GatewayConfig, build_gateway, init_metrics};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Gateway");

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    log_config(&config);

    if let Err(e) = init_metrics(config.server.metrics_port) {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let gateway = build_gateway(&config).context("failed to build gateway")?;
    warm_registries(&gateway).await;

    tracing::info!(venues = ?gateway.venues(), "Market gateway ready");

    await_shutdown().await;

    gateway.shutdown().await;
    tracing::info!("Market gateway stopped");
    Ok(())
}

/// Load instrument lists so stream events resolve to canonical symbols.
async fn warm_registries(gateway: &Gateway) {
    for venue in gateway.venues() {
        match gateway.fetch_markets(venue.as_str()).await {
            Ok(list) => {
                tracing::info!(venue = %venue, symbols = list.symbols.len(), "Instruments loaded");
            }
            Err(e) => {
                tracing::warn!(venue = %venue, error = %e, "Instrument refresh failed");
            }
        }
    }
}

fn log_config(config: &GatewayConfig) {
    tracing::info!(
        venues = ?config.venues,
        offset_hours = config.timestamp_offset.as_millis() / 3_600_000,
        metrics_port = config.server.metrics_port,
        resubscribe_on_reconnect = config.stream.resubscribe_on_reconnect,
        oanda_account = config.oanda.as_ref().is_some_and(|c| c.account_id().is_some()),
        "Configuration loaded"
    );
    for descriptor in config.catalog.iter() {
        tracing::debug!(
            venue = %descriptor.id,
            rest_url = %descriptor.rest_url,
            stream_url = descriptor.stream_url.as_deref().unwrap_or("-"),
            "Venue endpoints"
        );
    }
}

/// Load .env from the current directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
