//! Cache manager.

use super::backend::CacheStore;
use super::codec::EntryCodec;
use super::config::{CacheConfig, DEFAULT_EVICTION_INTERVAL};
use super::entry::{CacheEntry, MAX_TTL_SECS};
use super::eviction::{EvictionManager, EvictionStrategy};
use super::key::{CacheKey, CacheKeyGenerator};
use super::policy::{adaptive_ttl, should_cache};
use super::stats::{CacheStatistics, CacheStats};
use super::worker::{InvalidationQueue, WorkerContext, Workers};
use crate::{Error, ErrorContext, Result};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Optional settings for [`CacheManager::cache_response`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Explicit lifetime in seconds; otherwise the manager picks one.
    pub ttl: Option<u64>,
    pub tags: Vec<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl = Some(secs);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Result of [`CacheManager::health_check`].
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub store: &'static str,
    pub ready: bool,
    pub latency: Duration,
    pub workers_running: bool,
    pub error: Option<String>,
}

enum Lookup<T> {
    Hit(T),
    Miss,
    Expired,
}

/// LLM response cache over an injected [`CacheStore`].
///
/// Reads and writes never fail from the caller's point of view: store or
/// decoding problems are logged and surface as a miss or a refused write.
/// Invalidation is queued and applied by a background worker once
/// [`CacheManager::start`] has been called, so a read racing the worker may
/// still return the entry being removed. A hit writes the entry back with
/// updated access metadata only if the key still exists; a deletion landing
/// between that check and the write can resurrect the entry outside its tag
/// index until it expires or is evicted.
pub struct CacheManager {
    config: CacheConfig,
    keys: CacheKeyGenerator,
    ctx: Arc<WorkerContext>,
    workers: Mutex<Option<Workers>>,
}

impl CacheManager {
    /// Build a manager over `store`.
    ///
    /// An invalid configuration is logged rather than refused; a zero
    /// eviction interval falls back to [`DEFAULT_EVICTION_INTERVAL`].
    pub fn new(mut config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Cache configuration failed validation");
        }
        if config.eviction_interval.is_zero() {
            config.eviction_interval = DEFAULT_EVICTION_INTERVAL;
        }
        let stats = Arc::new(CacheStatistics::new());
        let ctx = Arc::new(WorkerContext {
            eviction: EvictionManager::new(
                store.clone(),
                stats.clone(),
                config.key_prefix.clone(),
            ),
            store,
            stats,
            queue: InvalidationQueue::new(),
            strategy: config.strategy,
            max_size: config.max_size,
            eviction_interval: config.eviction_interval,
        });
        Self {
            keys: CacheKeyGenerator::new(config.key_prefix.clone()),
            config,
            ctx,
            workers: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store_name(&self) -> &'static str {
        self.ctx.store.name()
    }

    pub fn key_for(&self, prompt: &str, model: &str, params: &Value) -> CacheKey {
        self.keys.generate(prompt, model, params)
    }

    /// Spawn the invalidation and eviction workers. Idempotent.
    pub fn start(&self) {
        let mut workers = self.lock_workers();
        if workers.is_some() {
            debug!("Cache workers already running");
            return;
        }
        *workers = Some(Workers::spawn(self.ctx.clone()));
        info!(
            store = self.store_name(),
            strategy = %self.config.strategy,
            max_size = self.config.max_size,
            "Cache workers started"
        );
    }

    /// Cancel both workers and wait for them to finish.
    pub async fn stop(&self) {
        let workers = self.lock_workers().take();
        if let Some(workers) = workers {
            workers.shutdown().await;
            info!("Cache workers stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_workers().is_some()
    }

    fn lock_workers(&self) -> MutexGuard<'_, Option<Workers>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a cached response. Any failure is reported as a miss.
    pub async fn get_cached_response<T: DeserializeOwned>(
        &self,
        prompt: &str,
        model: &str,
        params: &Value,
    ) -> Option<T> {
        let started = Instant::now();
        let key = self.key_for(prompt, model, params);
        let stats = &self.ctx.stats;

        let outcome = match self.lookup(&key).await {
            Ok(Lookup::Hit(value)) => {
                stats.record_hit();
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Ok(Lookup::Miss) => {
                stats.record_miss();
                debug!(key = %key, "Cache miss");
                None
            }
            Ok(Lookup::Expired) => {
                self.invalidate_key(key.as_str());
                stats.record_miss();
                debug!(key = %key, "Cache entry expired");
                None
            }
            Err(e) => {
                stats.record_miss();
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        };
        stats.record_latency(started.elapsed());
        outcome
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Lookup<T>> {
        let Some(payload) = self.ctx.store.get(key.as_str()).await? else {
            return Ok(Lookup::Miss);
        };
        let mut entry: CacheEntry<Value> = EntryCodec::decode(&payload)?;
        let now = Utc::now();
        if entry.is_expired_at(now) {
            return Ok(Lookup::Expired);
        }
        let value: T = serde_json::from_value(entry.value.clone())?;

        entry.update_access_at(now);
        let ttl = entry
            .remaining_ttl_at(now)
            .map(|remaining| remaining.max(Duration::from_secs(1)));
        match EntryCodec::encode(&entry) {
            Ok(updated) => self.write_back(key, &updated, ttl).await,
            Err(e) => warn!(key = %key, error = %e, "Failed to encode access metadata"),
        }
        Ok(Lookup::Hit(value))
    }

    /// Persist refreshed access metadata unless the entry was removed after it was read.
    async fn write_back(&self, key: &CacheKey, payload: &[u8], ttl: Option<Duration>) {
        let store = &self.ctx.store;
        let result = match store.exists(key.as_str()).await {
            Ok(true) => store.set(key.as_str(), payload, ttl).await,
            Ok(false) => {
                debug!(key = %key, "Entry removed during read, skipping access update");
                Ok(())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to persist access metadata");
        }
    }

    /// Store a response. Returns `false` when the policy refuses it or the
    /// store write fails.
    pub async fn cache_response<T: Serialize>(
        &self,
        prompt: &str,
        response: &T,
        model: &str,
        params: &Value,
        options: WriteOptions,
    ) -> bool {
        let text = match stringify(response) {
            Ok(text) => text,
            Err(e) => {
                warn!(model, error = %e, "Response is not serializable, not caching");
                return false;
            }
        };
        if let Err(reason) = should_cache(&text) {
            debug!(model, ?reason, "Response rejected by cache policy");
            return false;
        }

        let key = self.key_for(prompt, model, params);
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.calculate_ttl(prompt, &text));
        let entry = CacheEntry::new(key.key.clone(), response, Some(ttl))
            .with_tags(options.tags.iter().cloned())
            .with_metadata("model", model)
            .with_metadata("prompt_length", prompt.chars().count())
            .with_metadata("response_length", text.chars().count());

        let expiry = Duration::from_secs(ttl.clamp(1, MAX_TTL_SECS));
        let stored = match EntryCodec::encode(&entry) {
            Ok(payload) => self.ctx.store.set(key.as_str(), &payload, Some(expiry)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!(key = %key, error = %e, "Cache write failed");
            return false;
        }

        for tag in &options.tags {
            let tag_key = self.tag_key(tag);
            if let Err(e) = self.ctx.store.sadd(&tag_key, key.as_str()).await {
                warn!(key = %key, tag = %tag, error = %e, "Failed to index cache entry under tag");
            }
        }

        let size = self.ctx.stats.increment_size();
        debug!(key = %key, ttl, size, "Cached response");
        if size > self.config.max_size {
            if let Err(e) = self.ctx.run_eviction(self.config.strategy).await {
                warn!(error = %e, "Eviction after write failed");
            }
        }
        true
    }

    /// TTL for a write without an explicit one.
    pub fn calculate_ttl(&self, prompt: &str, response: &str) -> u64 {
        match self.config.strategy {
            EvictionStrategy::Adaptive => adaptive_ttl(
                self.config.default_ttl,
                prompt,
                response.chars().count(),
                self.ctx.stats.hit_rate(),
            ),
            _ => self.config.default_ttl,
        }
    }

    /// Queue `key` for deletion by the invalidation worker.
    pub fn invalidate_key(&self, key: &str) {
        self.ctx.queue.push(key.to_string());
    }

    /// Queue every key indexed under `tag`, then drop the tag index itself.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let tag_key = self.tag_key(tag);
        let members = match self.ctx.store.smembers(&tag_key).await {
            Ok(members) => members,
            Err(e) => {
                warn!(tag, error = %e, "Failed to read tag index");
                return 0;
            }
        };
        for key in &members {
            self.invalidate_key(key);
        }
        if let Err(e) = self.ctx.store.delete(&tag_key).await {
            warn!(tag, error = %e, "Failed to delete tag index");
        }
        info!(tag, count = members.len(), "Invalidated tag");
        members.len()
    }

    /// Queue every entry whose key matches `{key_prefix}{pattern}`.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let full = format!("{}{}", self.config.key_prefix, pattern);
        let keys = match self.ctx.store.keys(&full).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern = %full, error = %e, "Failed to list keys for invalidation");
                return 0;
            }
        };
        for key in &keys {
            self.invalidate_key(key);
        }
        info!(pattern = %full, count = keys.len(), "Invalidated pattern");
        keys.len()
    }

    pub async fn invalidate_all(&self) -> usize {
        self.invalidate_pattern("*").await
    }

    /// Keys queued for invalidation that the worker has not processed yet.
    pub fn pending_invalidations(&self) -> usize {
        self.ctx.queue.pending()
    }

    /// Run an eviction pass now and return the number of evicted entries.
    pub async fn trigger_eviction(&self, strategy: EvictionStrategy) -> Result<usize> {
        self.ctx.run_eviction(strategy).await
    }

    pub fn get_stats(&self) -> CacheStats {
        self.ctx.stats.snapshot()
    }

    /// Round-trip a sentinel key through the store.
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let result = self.probe_store().await;
        HealthReport {
            store: self.store_name(),
            ready: result.is_ok(),
            latency: started.elapsed(),
            workers_running: self.is_running(),
            error: result.err().map(|e| e.to_string()),
        }
    }

    async fn probe_store(&self) -> Result<()> {
        // Outside the key prefix, so eviction and pattern invalidation never see it.
        let sentinel = format!("{}__health", self.config.key_prefix.trim_end_matches(':'));
        let store = &self.ctx.store;
        store.set(&sentinel, b"ok", None).await?;
        let checks = async {
            let expiring = store.expire(&sentinel, Duration::from_secs(30)).await?;
            let ttl = store.ttl(&sentinel).await?;
            let exists = store.exists(&sentinel).await?;
            if expiring && ttl.is_some() && exists {
                Ok(())
            } else {
                Err(Error::store_with_context(
                    "health probe key did not round-trip",
                    ErrorContext::new()
                        .with_details(sentinel.clone())
                        .with_source("cache_manager"),
                ))
            }
        }
        .await;
        store.delete(&sentinel).await?;
        checks
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}", self.config.tag_prefix, tag)
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Some(workers) = self.lock_workers().as_ref() {
            workers.cancel();
        }
    }
}

/// Text the admission policy and TTL heuristics look at: strings as-is,
/// anything else as compact JSON.
fn stringify<T: Serialize>(value: &T) -> Result<String> {
    Ok(match serde_json::to_value(value)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}
