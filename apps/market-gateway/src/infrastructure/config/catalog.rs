//! Venue Catalog
//!
//! Default descriptors for every supported venue. The catalog is built once
//! at startup (defaults plus `<VENUE>_REST_URL` / `<VENUE>_STREAM_URL`
//! overrides) and shared read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::timeframe::Timeframe;
use crate::domain::venue::{Capabilities, VenueDescriptor, VenueId, VenueKind};

/// Immutable venue descriptors keyed by venue.
#[derive(Debug, Clone)]
pub struct VenueCatalog {
    descriptors: BTreeMap<VenueId, Arc<VenueDescriptor>>,
}

impl Default for VenueCatalog {
    fn default() -> Self {
        let descriptors = VenueId::ALL
            .into_iter()
            .map(|id| (id, Arc::new(default_descriptor(id))))
            .collect();
        Self { descriptors }
    }
}

impl VenueCatalog {
    /// Apply URL overrides from a variable source.
    ///
    /// `BINANCE_REST_URL=http://localhost:8080` replaces Binance's REST base
    /// URL; a `*_STREAM_URL` override also gives a stream to a venue that
    /// has none by default, but its capability flags are left alone.
    #[must_use]
    pub fn with_overrides<F>(self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: String| {
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let descriptors = self
            .descriptors
            .into_iter()
            .map(|(id, descriptor)| {
                let rest = non_empty(format!("{}_REST_URL", id.tag()));
                let stream = non_empty(format!("{}_STREAM_URL", id.tag()));
                if rest.is_none() && stream.is_none() {
                    return (id, descriptor);
                }
                let mut descriptor = (*descriptor).clone();
                if let Some(url) = rest {
                    descriptor.rest_url = url;
                }
                if let Some(url) = stream {
                    descriptor.stream_url = Some(url);
                }
                (id, Arc::new(descriptor))
            })
            .collect();
        Self { descriptors }
    }

    /// Descriptor for a venue.
    #[must_use]
    pub fn get(&self, venue: VenueId) -> Option<Arc<VenueDescriptor>> {
        self.descriptors.get(&venue).cloned()
    }

    /// All descriptors in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<VenueDescriptor>> {
        self.descriptors.values()
    }
}

// =============================================================================
// Defaults
// =============================================================================

/// Oanda instruments served without an account.
const OANDA_SYMBOLS: [&str; 8] = [
    "EUR_USD", "GBP_USD", "USD_JPY", "AUD_USD", "USD_CHF", "USD_CAD", "NZD_USD", "XAU_USD",
];

fn default_descriptor(id: VenueId) -> VenueDescriptor {
    match id {
        VenueId::Binance => VenueDescriptor {
            id,
            name: "Binance Futures".to_string(),
            short_name: "BNB-F".to_string(),
            description: "Binance USDⓈ-M perpetual futures".to_string(),
            kind: VenueKind::Crypto,
            rest_url: "https://fapi.binance.com".to_string(),
            stream_url: Some("wss://fstream.binance.com/ws".to_string()),
            timeframes: timeframe_map(|tf| Some(tf.as_str())),
            capabilities: Capabilities::streaming(),
            static_symbols: Vec::new(),
        },
        VenueId::Bybit => VenueDescriptor {
            id,
            name: "Bybit Linear".to_string(),
            short_name: "BYB-L".to_string(),
            description: "Bybit USDT linear perpetual futures".to_string(),
            kind: VenueKind::Crypto,
            rest_url: "https://api.bybit.com".to_string(),
            stream_url: Some("wss://stream.bybit.com/v5/public/linear".to_string()),
            timeframes: timeframe_map(|tf| {
                Some(match tf {
                    Timeframe::M1 => "1",
                    Timeframe::M3 => "3",
                    Timeframe::M5 => "5",
                    Timeframe::M15 => "15",
                    Timeframe::M30 => "30",
                    Timeframe::H1 => "60",
                    Timeframe::H2 => "120",
                    Timeframe::H4 => "240",
                    Timeframe::H6 => "360",
                    Timeframe::H12 => "720",
                    Timeframe::D1 => "D",
                    Timeframe::W1 => "W",
                    Timeframe::Mo1 => "M",
                })
            }),
            capabilities: Capabilities::streaming(),
            static_symbols: Vec::new(),
        },
        VenueId::Okx => VenueDescriptor {
            id,
            name: "OKX Swap".to_string(),
            short_name: "OKX-S".to_string(),
            description: "OKX perpetual swap markets".to_string(),
            kind: VenueKind::Crypto,
            rest_url: "https://www.okx.com".to_string(),
            stream_url: Some("wss://ws.okx.com:8443/ws/v5/public".to_string()),
            timeframes: timeframe_map(|tf| {
                Some(match tf {
                    Timeframe::M1 => "1m",
                    Timeframe::M3 => "3m",
                    Timeframe::M5 => "5m",
                    Timeframe::M15 => "15m",
                    Timeframe::M30 => "30m",
                    Timeframe::H1 => "1H",
                    Timeframe::H2 => "2H",
                    Timeframe::H4 => "4H",
                    Timeframe::H6 => "6H",
                    Timeframe::H12 => "12H",
                    Timeframe::D1 => "1D",
                    Timeframe::W1 => "1W",
                    Timeframe::Mo1 => "1M",
                })
            }),
            capabilities: Capabilities::streaming(),
            static_symbols: Vec::new(),
        },
        VenueId::Oanda => VenueDescriptor {
            id,
            name: "Oanda Forex".to_string(),
            short_name: "OANDA".to_string(),
            description: "Oanda v20 forex and metals (practice)".to_string(),
            kind: VenueKind::Forex,
            rest_url: "https://api-fxpractice.oanda.com".to_string(),
            stream_url: None,
            timeframes: timeframe_map(|tf| match tf {
                Timeframe::M1 => Some("M1"),
                Timeframe::M3 => None,
                Timeframe::M5 => Some("M5"),
                Timeframe::M15 => Some("M15"),
                Timeframe::M30 => Some("M30"),
                Timeframe::H1 => Some("H1"),
                Timeframe::H2 => Some("H2"),
                Timeframe::H4 => Some("H4"),
                Timeframe::H6 => Some("H6"),
                Timeframe::H12 => Some("H12"),
                Timeframe::D1 => Some("D"),
                Timeframe::W1 => Some("W"),
                Timeframe::Mo1 => Some("M"),
            }),
            capabilities: Capabilities::polled(),
            static_symbols: OANDA_SYMBOLS.iter().map(ToString::to_string).collect(),
        },
    }
}

fn timeframe_map(native: impl Fn(Timeframe) -> Option<&'static str>) -> BTreeMap<Timeframe, String> {
    Timeframe::ALL
        .into_iter()
        .filter_map(|tf| native(tf).map(|n| (tf, n.to_string())))
        .collect()
}
