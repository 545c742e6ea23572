use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters for bundle and asset loading
#[derive(Debug, Default)]
pub struct LoaderMetrics {
    load_times: RwLock<HashMap<String, Duration>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    bundle_loads: AtomicU64,
    asset_loads: AtomicU64,
    promotions: AtomicU64,
    failures: AtomicU64,
}

impl LoaderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how long a bundle took from request to Loaded
    pub fn record_load_time(&self, bundle: String, duration: Duration) {
        self.load_times.write().insert(bundle, duration);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A physical bundle read was issued
    pub fn record_bundle_load(&self) {
        self.bundle_loads.fetch_add(1, Ordering::Relaxed);
    }

    /// A physical asset read was issued
    pub fn record_asset_load(&self) {
        self.asset_loads.fetch_add(1, Ordering::Relaxed);
    }

    /// An in-flight async load was forced to resolve synchronously
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the cache hit rate as a percentage
    pub fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed) as f32;
        let misses = self.cache_misses.load(Ordering::Relaxed) as f32;

        if hits + misses > 0.0 {
            hits / (hits + misses) * 100.0
        } else {
            0.0
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn bundle_loads(&self) -> u64 {
        self.bundle_loads.load(Ordering::Relaxed)
    }

    pub fn asset_loads(&self) -> u64 {
        self.asset_loads.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Last recorded load time of a bundle
    pub fn load_time(&self, bundle: &str) -> Option<Duration> {
        self.load_times.read().get(bundle).cloned()
    }

    pub fn all_load_times(&self) -> HashMap<String, Duration> {
        self.load_times.read().clone()
    }
}

/// A shareable handle around LoaderMetrics
#[derive(Debug, Clone, Default)]
pub struct LoaderMetricsHandle(Arc<LoaderMetrics>);

impl LoaderMetricsHandle {
    pub fn new() -> Self {
        Self(Arc::new(LoaderMetrics::new()))
    }

    pub fn inner(&self) -> &LoaderMetrics {
        &self.0
    }
}

impl std::ops::Deref for LoaderMetricsHandle {
    type Target = LoaderMetrics;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = LoaderMetrics::new();
        assert_eq!(metrics.cache_hit_rate(), 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        assert_eq!(metrics.cache_hit_rate(), 75.0);
    }

    #[test]
    fn test_handle_shares_counters() {
        let handle = LoaderMetricsHandle::new();
        let clone = handle.clone();
        clone.record_promotion();
        clone.record_load_time("ui.ab".into(), Duration::from_millis(5));

        assert_eq!(handle.promotions(), 1);
        assert_eq!(handle.load_time("ui.ab"), Some(Duration::from_millis(5)));
    }
}
