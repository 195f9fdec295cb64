//! Canonical Symbols and the Symbol Registry
//!
//! Every venue spells instruments differently (`BTCUSDT`, `BTC-USDT-SWAP`,
//! `EUR_USD`). The gateway exposes one form, `VENUE:BASE/QUOTE`, and keeps a
//! per-venue registry translating in both directions.
//!
//! # Refresh
//!
//! The registry is rebuilt wholesale each time instruments are loaded.
//! [`SymbolRegistry::replace_all`] swaps a fully built map behind the lock,
//! so concurrent readers see either the old map or the new one, never a
//! half-filled one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::venue::VenueId;

// =============================================================================
// Canonical Symbol
// =============================================================================

/// Canonical instrument name: `VENUE:BASE/QUOTE`, uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalSymbol(String);

impl CanonicalSymbol {
    /// Mechanical standardization of a raw venue symbol.
    ///
    /// Uppercases and turns `-`/`_` separators into `/`. Symbols without a
    /// separator (`BTCUSDT`) cannot be split and stay concatenated.
    #[must_use]
    pub fn standardize(venue: VenueId, raw: &str) -> Self {
        let pair = raw.trim().to_uppercase().replace(['-', '_'], "/");
        Self(format!("{}:{pair}", venue.tag()))
    }

    /// Build from base and quote assets.
    #[must_use]
    pub fn from_parts(venue: VenueId, base: &str, quote: &str) -> Self {
        Self(format!(
            "{}:{}/{}",
            venue.tag(),
            base.trim().to_uppercase(),
            quote.trim().to_uppercase()
        ))
    }

    /// Interpret caller input for a venue.
    ///
    /// Accepts a full canonical symbol (`BINANCE:BTC/USDT`) or a bare pair
    /// (`btc/usdt`, `BTC-USDT`). Returns `None` when the input carries a
    /// different venue's prefix.
    #[must_use]
    pub fn resolve(venue: VenueId, input: &str) -> Option<Self> {
        match input.trim().split_once(':') {
            Some((tag, pair)) => {
                let tag_matches = tag.eq_ignore_ascii_case(venue.tag())
                    || tag.parse::<VenueId>().is_ok_and(|id| id == venue);
                tag_matches.then(|| Self::standardize(venue, pair))
            }
            None => Some(Self::standardize(venue, input)),
        }
    }

    /// Full canonical text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Venue tag prefix.
    #[must_use]
    pub fn venue_tag(&self) -> &str {
        self.0.split_once(':').map_or("", |(tag, _)| tag)
    }

    /// Pair part after the venue prefix (`BTC/USDT`).
    #[must_use]
    pub fn pair(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, pair)| pair)
    }

    /// Base asset, when the pair is split.
    #[must_use]
    pub fn base(&self) -> Option<&str> {
        self.pair().split_once('/').map(|(base, _)| base)
    }

    /// Quote asset, when the pair is split.
    #[must_use]
    pub fn quote(&self) -> Option<&str> {
        self.pair().split_once('/').map(|(_, quote)| quote)
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Symbol Registry
// =============================================================================

#[derive(Debug, Default, Clone)]
struct SymbolMaps {
    raw_to_canonical: HashMap<String, CanonicalSymbol>,
    canonical_to_raw: HashMap<CanonicalSymbol, String>,
}

impl SymbolMaps {
    fn insert(&mut self, raw: String, canonical: CanonicalSymbol) {
        self.canonical_to_raw.insert(canonical.clone(), raw.clone());
        self.raw_to_canonical.insert(raw, canonical);
    }
}

/// Bidirectional raw ↔ canonical mapping for one venue.
#[derive(Debug)]
pub struct SymbolRegistry {
    venue: VenueId,
    maps: RwLock<Arc<SymbolMaps>>,
}

impl SymbolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(venue: VenueId) -> Self {
        Self {
            venue,
            maps: RwLock::new(Arc::new(SymbolMaps::default())),
        }
    }

    /// Venue this registry serves.
    #[must_use]
    pub const fn venue(&self) -> VenueId {
        self.venue
    }

    /// Mechanical standardization for this registry's venue.
    #[must_use]
    pub fn standardize(&self, raw: &str) -> CanonicalSymbol {
        CanonicalSymbol::standardize(self.venue, raw)
    }

    /// Record a single mapping, replacing any previous entry for `raw`.
    pub fn register_mapping(&self, raw: impl Into<String>, canonical: CanonicalSymbol) {
        let mut guard = self.maps.write();
        Arc::make_mut(&mut guard).insert(raw.into(), canonical);
    }

    /// Replace every mapping with `entries`.
    ///
    /// Each canonical symbol maps to exactly one raw symbol. When several
    /// entries share a canonical form the first one is kept; the rest are
    /// returned so the caller can report them.
    pub fn replace_all(
        &self,
        entries: impl IntoIterator<Item = (String, CanonicalSymbol)>,
    ) -> Vec<(String, CanonicalSymbol)> {
        let mut next = SymbolMaps::default();
        let mut rejected = Vec::new();
        for (raw, canonical) in entries {
            if next.canonical_to_raw.contains_key(&canonical) {
                rejected.push((raw, canonical));
            } else {
                next.insert(raw, canonical);
            }
        }
        *self.maps.write() = Arc::new(next);
        rejected
    }

    /// Canonical form of a raw symbol; unregistered symbols are standardized
    /// mechanically.
    #[must_use]
    pub fn canonical_for(&self, raw: &str) -> CanonicalSymbol {
        self.lookup_canonical(raw)
            .unwrap_or_else(|| self.standardize(raw))
    }

    /// Raw form of a canonical symbol.
    ///
    /// Unregistered symbols fall back to stripping the venue prefix and
    /// every `/`. That is only right for venues that concatenate base and
    /// quote; adapters needing another shape consult [`Self::lookup_raw`]
    /// first.
    #[must_use]
    pub fn raw_for(&self, canonical: &CanonicalSymbol) -> String {
        self.lookup_raw(canonical)
            .unwrap_or_else(|| canonical.pair().replace('/', ""))
    }

    /// Registered canonical form, if any.
    #[must_use]
    pub fn lookup_canonical(&self, raw: &str) -> Option<CanonicalSymbol> {
        self.snapshot().raw_to_canonical.get(raw).cloned()
    }

    /// Registered raw form, if any.
    #[must_use]
    pub fn lookup_raw(&self, canonical: &CanonicalSymbol) -> Option<String> {
        self.snapshot().canonical_to_raw.get(canonical).cloned()
    }

    /// Registered canonical symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<CanonicalSymbol> {
        let mut symbols: Vec<_> = self.snapshot().canonical_to_raw.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Registered raw symbols, sorted.
    #[must_use]
    pub fn raw_symbols(&self) -> Vec<String> {
        let mut raws: Vec<_> = self.snapshot().raw_to_canonical.keys().cloned().collect();
        raws.sort();
        raws
    }

    /// Number of registered mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().raw_to_canonical.len()
    }

    /// Whether nothing has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<SymbolMaps> {
        Arc::clone(&self.maps.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use test_case::test_case;

    #[test_case(VenueId::Binance, "btcusdt", "BINANCE:BTCUSDT" ; "no separator")]
    #[test_case(VenueId::Okx, "BTC-USDT", "OKX:BTC/USDT" ; "dash")]
    #[test_case(VenueId::Oanda, "eur_usd", "OANDA:EUR/USD" ; "underscore")]
    #[test_case(VenueId::Bybit, "ETH/USDT", "BYBIT:ETH/USDT" ; "already slashed")]
    fn standardizes(venue: VenueId, raw: &str, expected: &str) {
        assert_eq!(CanonicalSymbol::standardize(venue, raw).as_str(), expected);
    }

    #[test]
    fn parts_are_exposed() {
        let symbol = CanonicalSymbol::from_parts(VenueId::Binance, "btc", "usdt");
        assert_eq!(symbol.as_str(), "BINANCE:BTC/USDT");
        assert_eq!(symbol.venue_tag(), "BINANCE");
        assert_eq!(symbol.pair(), "BTC/USDT");
        assert_eq!(symbol.base(), Some("BTC"));
        assert_eq!(symbol.quote(), Some("USDT"));
    }

    #[test]
    fn resolve_accepts_bare_pairs_and_own_prefix() {
        let own = CanonicalSymbol::resolve(VenueId::Okx, "okx:btc/usdt").unwrap();
        assert_eq!(own.as_str(), "OKX:BTC/USDT");
        let alias = CanonicalSymbol::resolve(VenueId::Okx, "OKX_FUTURE:BTC/USDT").unwrap();
        assert_eq!(alias, own);
        let bare = CanonicalSymbol::resolve(VenueId::Okx, "BTC-USDT").unwrap();
        assert_eq!(bare, own);
        assert!(CanonicalSymbol::resolve(VenueId::Okx, "BINANCE:BTC/USDT").is_none());
    }

    #[test]
    fn registered_mapping_wins_over_fallbacks() {
        let registry = SymbolRegistry::new(VenueId::Binance);
        let canonical = CanonicalSymbol::from_parts(VenueId::Binance, "BTC", "USDT");
        registry.register_mapping("BTCUSDT", canonical.clone());

        assert_eq!(registry.canonical_for("BTCUSDT"), canonical);
        assert_eq!(registry.raw_for(&canonical), "BTCUSDT");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn fallbacks_are_mechanical() {
        let registry = SymbolRegistry::new(VenueId::Okx);
        assert_eq!(
            registry.canonical_for("ETH-USDT-SWAP").as_str(),
            "OKX:ETH/USDT/SWAP"
        );
        let canonical = CanonicalSymbol::from_parts(VenueId::Okx, "ETH", "USDT");
        assert_eq!(registry.raw_for(&canonical), "ETHUSDT");
        assert!(registry.lookup_raw(&canonical).is_none());
    }

    #[test]
    fn replace_all_drops_previous_entries() {
        let registry = SymbolRegistry::new(VenueId::Bybit);
        registry.register_mapping("OLDUSDT", CanonicalSymbol::from_parts(VenueId::Bybit, "OLD", "USDT"));

        registry.replace_all(vec![
            ("BTCUSDT".to_string(), CanonicalSymbol::from_parts(VenueId::Bybit, "BTC", "USDT")),
            ("ETHUSDT".to_string(), CanonicalSymbol::from_parts(VenueId::Bybit, "ETH", "USDT")),
        ]);

        assert_eq!(registry.len(), 2);
        assert!(registry.lookup_canonical("OLDUSDT").is_none());
        assert_eq!(registry.raw_symbols(), vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(registry.symbols()[0].as_str(), "BYBIT:BTC/USDT");
    }

    #[test]
    fn replace_all_keeps_the_first_raw_for_a_shared_canonical() {
        let registry = SymbolRegistry::new(VenueId::Bybit);
        let btc = CanonicalSymbol::from_parts(VenueId::Bybit, "BTC", "USDT");

        let rejected = registry.replace_all(vec![
            ("BTCUSDT".to_string(), btc.clone()),
            ("BTCUSDT-26DEC25".to_string(), btc.clone()),
        ]);

        assert_eq!(rejected, vec![("BTCUSDT-26DEC25".to_string(), btc.clone())]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.raw_for(&btc), "BTCUSDT");
        assert_eq!(registry.raw_for(&registry.canonical_for("BTCUSDT")), "BTCUSDT");
        assert!(registry.lookup_canonical("BTCUSDT-26DEC25").is_none());
    }

    #[test]
    fn readers_see_whole_maps_during_refresh() {
        use std::thread;

        let registry = Arc::new(SymbolRegistry::new(VenueId::Binance));
        let batch = |suffix: &str| {
            (0..50)
                .map(|i| {
                    let base = format!("C{i}{suffix}");
                    (format!("{base}USDT"), CanonicalSymbol::from_parts(VenueId::Binance, &base, "USDT"))
                })
                .collect::<Vec<_>>()
        };
        registry.replace_all(batch("A"));

        let writer = {
            let registry = Arc::clone(&registry);
            let a = batch("A");
            let b = batch("B");
            thread::spawn(move || {
                for round in 0..100 {
                    registry.replace_all(if round % 2 == 0 { b.clone() } else { a.clone() });
                }
            })
        };

        for _ in 0..200 {
            assert_eq!(registry.len(), 50);
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn raw_round_trips_through_canonical(
            pairs in prop::collection::btree_set(("[A-Z]{2,5}", "[A-Z]{3,4}"), 1..20)
        ) {
            let registry = SymbolRegistry::new(VenueId::Okx);
            let raws: BTreeSet<String> = pairs
                .iter()
                .map(|(base, quote)| format!("{base}-{quote}-SWAP"))
                .collect();
            registry.replace_all(raws.iter().map(|raw| {
                let (base, rest) = raw.split_once('-').unwrap();
                let quote = rest.trim_end_matches("-SWAP");
                (raw.clone(), CanonicalSymbol::from_parts(VenueId::Okx, base, quote))
            }));

            for raw in &raws {
                prop_assert_eq!(&registry.raw_for(&registry.canonical_for(raw)), raw);
            }
        }
    }
}
