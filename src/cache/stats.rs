//! Cache Statistics Module
//!
//! Tracks cache performance metrics across both tiers.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookups answered by the primary tier
    pub hits: u64,
    /// Lookups answered by the file tier and promoted to the primary tier
    pub file_hits: u64,
    /// Lookups for keys that were never cached
    pub misses: u64,
    /// Lookups for keys whose value expired
    pub expired: u64,
    /// Entries evicted to respect the per-signature limit
    pub evictions: u64,
    /// Value files discarded after failing verification
    pub corruptions: u64,
    /// Failed writes to either tier
    pub write_failures: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate over both tiers.
    ///
    /// Returns hits / lookups, or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.file_hits;
        let total = hits + self.misses + self.expired;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_file_hit(&mut self) {
        self.file_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_expired(&mut self) {
        self.expired += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_corruption(&mut self) {
        self.corruptions += 1;
    }

    pub fn record_write_failure(&mut self) {
        self.write_failures += 1;
    }
}
