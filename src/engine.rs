use tracing::debug;

use crate::cache::GeocodeCache;
use crate::cancel::CancellationFlag;
use crate::normalize::{CacheKey, ZipCode};
use crate::providers::{AddressQuery, ProviderChain};
use crate::stats::StatsHandle;

/// Per-address resolver: normalize, consult the cache, fall back to the
/// provider chain, then remember the outcome.
pub struct GeocodeEngine {
    chain: ProviderChain,
    cache: GeocodeCache,
    stats: StatsHandle,
    cancel: CancellationFlag,
}

impl GeocodeEngine {
    pub fn new(chain: ProviderChain, stats: StatsHandle, cancel: CancellationFlag) -> Self {
        Self {
            chain,
            cache: GeocodeCache::new(),
            stats,
            cancel,
        }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub async fn resolve(&mut self, address: &str, city: &str, state: &str) -> Option<ZipCode> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let key = CacheKey::new(address, city, state);
        if let Some(cached) = self.cache.get(&key) {
            self.stats.record_cache_hit();
            debug!(key = %key, hit = ?cached, "geocode cache hit");
            return cached.clone();
        }

        self.stats.record_lookup_started(key.city_label(), key.to_string());

        let query = AddressQuery {
            address: key.address.clone(),
            city: key.city.clone(),
            state: key.state.clone(),
        };
        let resolved = self.chain.resolve(&query, &self.cancel, &self.stats).await;

        match &resolved {
            Some(zip) => {
                debug!(key = %key, zip = %zip, "resolved postal code");
                self.stats
                    .record_success(zip.clone(), format!("SUCCESS: {key} -> {zip}"));
            }
            None => {
                debug!(key = %key, "no provider resolved postal code");
                self.stats.record_failure(format!("FAILED: {key}"));
            }
        }
        self.cache.put(key, resolved.clone());

        resolved
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::providers::tests::{chain_of, found, StubLookup};
    use crate::providers::LookupOutcome;
    use crate::stats::LogKind;

    fn engine_with(stubs: &[&Arc<StubLookup>]) -> (GeocodeEngine, StatsHandle, CancellationFlag) {
        let stats = StatsHandle::new(100);
        let cancel = CancellationFlag::new();
        let engine = GeocodeEngine::new(chain_of(stubs), stats.clone(), cancel.clone());
        (engine, stats, cancel)
    }

    #[tokio::test]
    async fn resolves_through_the_chain_and_records_success() {
        let census = Arc::new(StubLookup::new("census", vec![found("62701")]));
        let (mut engine, stats, _) = engine_with(&[&census]);

        let zip = engine.resolve("123 Main St Apt 4B", "springfield", "il").await;

        assert_eq!(zip, ZipCode::parse("62701"));
        let query = census.calls.lock()[0].clone();
        assert_eq!(query.address, "123 MAIN ST #4B");
        assert_eq!(query.city, "Springfield");
        assert_eq!(query.state, "IL");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.successful_geocodes, 1);
        assert_eq!(snapshot.api_calls, 1);
        assert_eq!(snapshot.cities_processed, vec!["Springfield, IL".to_string()]);
        assert_eq!(snapshot.zip_codes_found, vec!["62701".to_string()]);
        assert_eq!(snapshot.current_address, "123 MAIN ST #4B, Springfield, IL");
        assert_eq!(snapshot.results_log[0].kind, LogKind::Success);
        assert!(snapshot.results_log[0].message.contains("62701"));
    }

    #[tokio::test]
    async fn repeated_addresses_are_served_from_cache() {
        let census = Arc::new(StubLookup::new("census", vec![found("62701")]));
        let nominatim = Arc::new(StubLookup::new("nominatim", vec![]));
        let (mut engine, stats, _) = engine_with(&[&census, &nominatim]);

        let first = engine.resolve("123 Main St Apt 4B", "Springfield", "IL").await;
        let second = engine.resolve("123 MAIN ST. UNIT 4B", "SPRINGFIELD", "il ").await;

        assert_eq!(first, second);
        assert_eq!(census.call_count(), 1);
        assert_eq!(nominatim.call_count(), 0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.api_calls, 1);
        assert_eq!(snapshot.successful_geocodes, 1);
        assert_eq!(engine.cache().len(), 1);
    }

    #[tokio::test]
    async fn failed_lookups_are_cached_too() {
        let census = Arc::new(StubLookup::new("census", vec![LookupOutcome::NotFound]));
        let nominatim = Arc::new(StubLookup::new(
            "nominatim",
            vec![LookupOutcome::Error("timeout".into()), found("10001")],
        ));
        let (mut engine, stats, _) = engine_with(&[&census, &nominatim]);

        assert_eq!(engine.resolve("1 Lost Way", "Nowhere", "KS").await, None);
        assert_eq!(engine.resolve("1 Lost Way", "Nowhere", "KS").await, None);

        assert_eq!(census.call_count(), 1);
        assert_eq!(nominatim.call_count(), 1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failed_geocodes, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.api_calls, 2);
        assert_eq!(snapshot.results_log.len(), 1);
        assert_eq!(snapshot.results_log[0].kind, LogKind::Failure);
        assert!(snapshot.zip_codes_found.is_empty());
    }

    #[tokio::test]
    async fn cancelled_engine_does_nothing() {
        let census = Arc::new(StubLookup::new("census", vec![found("62701")]));
        let (mut engine, stats, cancel) = engine_with(&[&census]);
        cancel.cancel();

        assert_eq!(engine.resolve("1 Main St", "Springfield", "IL").await, None);
        assert_eq!(census.call_count(), 0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.api_calls, 0);
        assert_eq!(snapshot.failed_geocodes, 0);
        assert!(snapshot.cities_processed.is_empty());
        assert!(engine.cache().is_empty());
    }
}
