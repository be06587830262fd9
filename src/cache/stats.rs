//! Process-local cache statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Read-only statistics snapshot for monitoring and health endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    /// Advisory live-entry count; the store is authoritative.
    pub cache_size: u64,
    pub hit_rate: f64,
    /// Average get latency in seconds.
    pub avg_latency: f64,
}

impl CacheStats {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "hits": self.hits,
            "misses": self.misses,
            "evictions": self.evictions,
            "invalidations": self.invalidations,
            "cache_size": self.cache_size,
            "hit_rate": self.hit_rate,
            "avg_latency": self.avg_latency,
        })
    }
}

/// Lock-free counters shared by the foreground paths and background workers.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    cache_size: AtomicU64,
    latency_micros: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Returns the new size.
    pub fn increment_size(&self) -> u64 {
        self.cache_size.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Subtract `count` from the size, never going below zero.
    pub fn decrement_size(&self, count: u64) {
        let _ = self
            .cache_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |size| {
                Some(size.saturating_sub(count))
            });
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn cache_size(&self) -> u64 {
        self.cache_size.load(Ordering::Relaxed)
    }

    pub fn total_latency(&self) -> Duration {
        Duration::from_micros(self.latency_micros.load(Ordering::Relaxed))
    }

    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits(), self.hits() + self.misses())
    }

    pub fn snapshot(&self) -> CacheStats {
        let hits = self.hits();
        let misses = self.misses();
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            cache_size: self.cache_size(),
            hit_rate: ratio(hits, total),
            avg_latency: if total == 0 {
                0.0
            } else {
                self.total_latency().as_secs_f64() / total as f64
            },
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
