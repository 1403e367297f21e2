//! Metrics collection for the edge media cache
//!
//! This module provides thread-safe metrics collection using atomic operations.
//! It tracks cache hits and misses, origin traffic and coalesced requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the resolver
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Request statistics
    total_requests: AtomicU64,
    failed_requests: AtomicU64,

    // Cache statistics
    whole_hits: AtomicU64,
    range_hits: AtomicU64,
    cache_misses: AtomicU64,
    coalesced: AtomicU64,
    store_errors: AtomicU64,

    // Origin statistics
    origin_fetches: AtomicU64,
    origin_passthroughs: AtomicU64,
    origin_failures: AtomicU64,

    // Byte statistics
    bytes_from_origin: AtomicU64,
    bytes_from_cache: AtomicU64,
    bytes_to_client: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_request_duration_us: AtomicU64,
    total_origin_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,

    pub whole_hits: u64,
    pub range_hits: u64,
    pub cache_misses: u64,
    pub coalesced: u64,
    pub store_errors: u64,

    pub origin_fetches: u64,
    pub origin_passthroughs: u64,
    pub origin_failures: u64,

    pub bytes_from_origin: u64,
    pub bytes_from_cache: u64,
    pub bytes_to_client: u64,

    pub total_request_duration_us: u64,
    pub total_origin_duration_us: u64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved request
    ///
    /// # Arguments
    /// * `success` - Whether the resolver produced a response (passthroughs count as success)
    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a hit on a whole-object entry
    pub fn record_whole_hit(&self) {
        self.whole_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hit on a range-variant entry
    pub fn record_range_hit(&self) {
        self.range_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup that missed before taking the fetch lock
    ///
    /// Requests later answered by the re-check are also counted as coalesced.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request answered by the re-check after waiting on the lock
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an origin fetch
    ///
    /// # Arguments
    /// * `bytes` - Body bytes received
    /// * `duration` - Time spent on the fetch
    pub fn record_origin_fetch(&self, bytes: u64, duration: Duration) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
        self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
        self.total_origin_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record an origin response that was passed through uncached
    pub fn record_origin_passthrough(&self) {
        self.origin_passthroughs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transport failure talking to the origin
    pub fn record_origin_failure(&self) {
        self.origin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_from_cache(&self, bytes: u64) {
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_to_client(&self, bytes: u64) {
        self.bytes_to_client.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Counters are read one by one, so a snapshot taken under load may not
    /// be perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            whole_hits: self.whole_hits.load(Ordering::Relaxed),
            range_hits: self.range_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            origin_passthroughs: self.origin_passthroughs.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
            total_origin_duration_us: self.total_origin_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.whole_hits.store(0, Ordering::Relaxed);
        self.range_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.store_errors.store(0, Ordering::Relaxed);
        self.origin_fetches.store(0, Ordering::Relaxed);
        self.origin_passthroughs.store(0, Ordering::Relaxed);
        self.origin_failures.store(0, Ordering::Relaxed);
        self.bytes_from_origin.store(0, Ordering::Relaxed);
        self.bytes_from_cache.store(0, Ordering::Relaxed);
        self.bytes_to_client.store(0, Ordering::Relaxed);
        self.total_request_duration_us.store(0, Ordering::Relaxed);
        self.total_origin_duration_us.store(0, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Fraction of lookups answered from cache, as a percentage
    ///
    /// Coalesced requests are a subset of `cache_misses` and count as hits.
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.whole_hits + self.range_hits + self.coalesced;
        let total = self.whole_hits + self.range_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Average request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }

    /// Average origin fetch duration in milliseconds
    pub fn avg_origin_duration_ms(&self) -> f64 {
        if self.origin_fetches == 0 {
            0.0
        } else {
            (self.total_origin_duration_us as f64 / self.origin_fetches as f64) / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.get_stats(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_requests() {
        let metrics = CacheMetrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.failed_requests, 1);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new();
        metrics.record_whole_hit();
        metrics.record_range_hit();
        // One request fetched, the other waited on the lock
        metrics.record_cache_miss();
        metrics.record_cache_miss();
        metrics.record_coalesced();
        let stats = metrics.get_stats();
        assert!((stats.cache_hit_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_origin_fetch_accounting() {
        let metrics = CacheMetrics::new();
        metrics.record_origin_fetch(100, Duration::from_millis(4));
        metrics.record_origin_fetch(50, Duration::from_millis(2));
        let stats = metrics.get_stats();
        assert_eq!(stats.origin_fetches, 2);
        assert_eq!(stats.bytes_from_origin, 150);
        assert!((stats.avg_origin_duration_ms() - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_request(true);
        metrics.record_bytes_to_client(10);
        metrics.reset();
        assert_eq!(metrics.get_stats(), MetricsSnapshot::default());
    }
}
