//! # LLM Response Cache
//!
//! A keyed, TTL-aware, tag-indexed cache for LLM responses, layered on an
//! injected key-value store.
//!
//! ## Overview
//!
//! - Keys are derived deterministically from `(prompt, model, params)`:
//!   `llm_cache_v2:{model}:{sha256(canonical_json)[..32]}`
//! - Entries carry creation/access bookkeeping, an optional TTL, tags and
//!   free-form metadata
//! - Tags are indexed as store sets under `llm_tag:{tag}` for group invalidation
//! - Invalidation is queued and applied by a background worker
//! - A second worker periodically evicts entries once the cache nears capacity
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Read/write paths, invalidation, worker lifecycle |
//! | [`CacheConfig`] | Strategy, capacity, TTL and namespace configuration |
//! | [`CacheStore`] | Trait for the underlying key-value store |
//! | [`MemoryStore`] | In-process store with lazy expiry |
//! | [`EvictionManager`] | TTL / LRU / LFU / Adaptive victim selection |
//! | [`CacheEntry`] | Cached value plus access bookkeeping |
//! | [`EntryCodec`] | Entry (de)serialization |
//! | [`CacheStatistics`] | Hit/miss/eviction/latency counters |
//!
//! ## Example
//!
//! ```rust,no_run
//! use llm_cache::cache::{CacheConfig, CacheManager, MemoryStore, WriteOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let cache = CacheManager::new(CacheConfig::default(), Arc::new(MemoryStore::new()));
//! cache.start();
//!
//! let params = json!({"temperature": 0.0});
//! cache
//!     .cache_response(
//!         "What is the capital of France?",
//!         &"Paris is the capital of France.",
//!         "gpt-4",
//!         &params,
//!         WriteOptions::new().with_tag("geography"),
//!     )
//!     .await;
//!
//! let hit: Option<String> = cache
//!     .get_cached_response("What is the capital of France?", "gpt-4", &params)
//!     .await;
//! assert!(hit.is_some());
//!
//! cache.invalidate_tag("geography").await;
//! cache.stop().await;
//! # }
//! ```

mod backend;
mod codec;
mod config;
mod entry;
mod eviction;
mod key;
mod manager;
mod policy;
mod stats;
mod worker;

pub use backend::{CacheStore, MemoryStore};
pub use codec::EntryCodec;
pub use config::{
    CacheConfig, DEFAULT_EVICTION_INTERVAL, DEFAULT_KEY_PREFIX, DEFAULT_TAG_PREFIX,
};
pub use entry::CacheEntry;
pub use eviction::{EvictionManager, EvictionStrategy, HIGH_HIT_RATE, LOW_HIT_RATE};
pub use key::{canonical_json, CacheKey, CacheKeyGenerator, DIGEST_LEN};
pub use manager::{CacheManager, HealthReport, WriteOptions};
pub use policy::{
    adaptive_ttl, should_cache, Rejection, LARGE_RESPONSE_CHARS, MAX_RESPONSE_CHARS,
    MIN_RESPONSE_CHARS, VOLATILE_TTL_SECS,
};
pub use stats::{CacheStatistics, CacheStats};
pub use worker::CAPACITY_HEADROOM;
