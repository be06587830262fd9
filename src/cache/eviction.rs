//! Capacity-driven eviction.

use super::backend::CacheStore;
use super::codec::EntryCodec;
use super::stats::CacheStatistics;
use crate::{Error, ErrorContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Below this hit rate the cache is considered ineffective.
pub const LOW_HIT_RATE: f64 = 0.3;
/// Above this hit rate the cache is considered effective.
pub const HIGH_HIT_RATE: f64 = 0.7;

/// How victims are chosen when the cache is over capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Every expired entry.
    Ttl,
    /// The least recently accessed 10%.
    Lru,
    /// The least frequently accessed 10%.
    Lfu,
    /// LRU while the hit rate is below 0.3, LFU otherwise.
    #[default]
    Adaptive,
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionStrategy::Ttl => "ttl",
            EvictionStrategy::Lru => "lru",
            EvictionStrategy::Lfu => "lfu",
            EvictionStrategy::Adaptive => "adaptive",
        }
    }

    /// The concrete strategy to run given the current hit rate.
    pub fn resolve(self, hit_rate: f64) -> EvictionStrategy {
        match self {
            EvictionStrategy::Adaptive if hit_rate < LOW_HIT_RATE => EvictionStrategy::Lru,
            EvictionStrategy::Adaptive => EvictionStrategy::Lfu,
            other => other,
        }
    }
}

impl std::fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvictionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ttl" => Ok(EvictionStrategy::Ttl),
            "lru" => Ok(EvictionStrategy::Lru),
            "lfu" => Ok(EvictionStrategy::Lfu),
            "adaptive" => Ok(EvictionStrategy::Adaptive),
            other => Err(Error::configuration_with_context(
                format!("unknown eviction strategy '{}'", other),
                ErrorContext::new()
                    .with_field_path("strategy")
                    .with_details("expected one of: ttl, lru, lfu, adaptive")
                    .with_source("eviction_manager"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    key: String,
    accessed_at: DateTime<Utc>,
    access_count: u64,
    expired: bool,
}

#[derive(Debug, Default)]
struct Scan {
    population: usize,
    candidates: Vec<Candidate>,
    /// Keys whose payload could not be decoded.
    corrupt: Vec<String>,
}

/// 10% of the population, at least one entry when anything is cached.
fn eviction_quota(population: usize) -> usize {
    if population == 0 {
        0
    } else {
        (population / 10).max(1)
    }
}

/// Selects and removes victim entries under the cache prefix.
pub struct EvictionManager {
    store: Arc<dyn CacheStore>,
    stats: Arc<CacheStatistics>,
    key_prefix: String,
}

impl EvictionManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        stats: Arc<CacheStatistics>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            stats,
            key_prefix: key_prefix.into(),
        }
    }

    /// Run one eviction pass and return how many entries were deleted.
    ///
    /// Fails only if the key listing itself fails or the strategy cannot be
    /// resolved; individual delete failures are logged and skipped.
    pub async fn trigger_eviction(&self, strategy: EvictionStrategy) -> Result<usize> {
        let hit_rate = self.stats.hit_rate();
        let resolved = strategy.resolve(hit_rate);
        let victims = self.select_victims(resolved).await?;
        let evicted = self.remove(&victims).await;
        info!(
            strategy = %strategy,
            resolved = %resolved,
            hit_rate,
            selected = victims.len(),
            evicted,
            "Eviction pass finished"
        );
        Ok(evicted)
    }

    /// Keys the given strategy would evict right now, without deleting them.
    pub async fn select_victims(&self, strategy: EvictionStrategy) -> Result<Vec<String>> {
        let scan = self.scan().await?;
        let quota = eviction_quota(scan.population);
        let Scan {
            candidates,
            corrupt,
            ..
        } = scan;

        let ranked: Vec<String> = match strategy {
            EvictionStrategy::Ttl => candidates
                .into_iter()
                .filter(|c| c.expired)
                .map(|c| c.key)
                .collect(),
            EvictionStrategy::Lru => {
                let mut candidates = candidates;
                candidates.sort_by(|a, b| {
                    a.accessed_at
                        .cmp(&b.accessed_at)
                        .then_with(|| a.key.cmp(&b.key))
                });
                candidates.into_iter().take(quota).map(|c| c.key).collect()
            }
            EvictionStrategy::Lfu => {
                let mut candidates = candidates;
                candidates.sort_by(|a, b| {
                    a.access_count
                        .cmp(&b.access_count)
                        .then_with(|| a.accessed_at.cmp(&b.accessed_at))
                        .then_with(|| a.key.cmp(&b.key))
                });
                candidates.into_iter().take(quota).map(|c| c.key).collect()
            }
            EvictionStrategy::Adaptive => {
                return Err(Error::configuration_with_context(
                    "adaptive strategy must be resolved before selecting victims",
                    ErrorContext::new()
                        .with_field_path("strategy")
                        .with_source("eviction_manager"),
                ));
            }
        };

        let mut victims = corrupt;
        victims.extend(ranked);
        Ok(victims)
    }

    async fn scan(&self) -> Result<Scan> {
        let pattern = format!("{}*", self.key_prefix);
        let keys = self.store.keys(&pattern).await?;
        let now = Utc::now();
        let mut scan = Scan {
            population: keys.len(),
            ..Scan::default()
        };

        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(payload)) => match EntryCodec::decode_header(&payload) {
                    Ok(entry) => scan.candidates.push(Candidate {
                        expired: entry.is_expired_at(now),
                        accessed_at: entry.accessed_at(),
                        access_count: entry.access_count(),
                        key,
                    }),
                    Err(e) => {
                        debug!(key = %key, error = %e, "Undecodable entry marked for eviction");
                        scan.corrupt.push(key);
                    }
                },
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping eviction candidate"),
            }
        }
        Ok(scan)
    }

    async fn remove(&self, victims: &[String]) -> usize {
        let mut evicted = 0;
        for key in victims {
            match self.store.delete(key).await {
                Ok(true) => evicted += 1,
                Ok(false) => debug!(key = %key, "Eviction victim already gone"),
                Err(e) => warn!(key = %key, error = %e, "Failed to evict entry"),
            }
        }
        evicted
    }
}
