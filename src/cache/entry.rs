//! Cached entry model.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A single cached LLM response together with its access bookkeeping.
///
/// `value` is generic so callers can cache any serde-serializable payload;
/// the eviction path reads entries without materialising the value at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    key: String,
    pub value: T,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    access_count: u64,
    /// Lifetime in seconds; `None` never expires.
    pub ttl: Option<u64>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, value: T, ttl: Option<u64>) -> Self {
        Self::new_at(key, value, ttl, Utc::now())
    }

    pub fn new_at(key: impl Into<String>, value: T, ttl: Option<u64>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Rebuild an entry from persisted fields. Used by the codec.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        key: String,
        value: T,
        created_at: DateTime<Utc>,
        accessed_at: DateTime<Utc>,
        access_count: u64,
        ttl: Option<u64>,
        tags: Vec<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            key,
            value,
            created_at,
            accessed_at: accessed_at.max(created_at),
            access_count,
            ttl,
            tags,
            metadata,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn accessed_at(&self) -> DateTime<Utc> {
        self.accessed_at
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// True iff a ttl is set and more than `ttl` seconds elapsed since creation.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => now.signed_duration_since(self.created_at) > ttl_duration(ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Record a successful read.
    pub fn update_access_at(&mut self, now: DateTime<Utc>) {
        self.accessed_at = now.max(self.created_at);
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn update_access(&mut self) {
        self.update_access_at(Utc::now())
    }

    /// Time left before the entry expires, rounded up to whole seconds.
    ///
    /// `None` when the entry never expires; an expired entry reports zero.
    pub fn remaining_ttl_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let ttl = self.ttl?;
        let remaining = ttl_duration(ttl) - now.signed_duration_since(self.created_at);
        if remaining <= ChronoDuration::zero() {
            return Some(Duration::ZERO);
        }
        let millis = remaining.num_milliseconds().max(0) as u64;
        Some(Duration::from_secs(millis.div_ceil(1000)))
    }
}

/// Longest lifetime honored, in seconds; larger TTLs are clamped to it.
pub(crate) const MAX_TTL_SECS: u64 = 1_000_000_000_000;

fn ttl_duration(ttl: u64) -> ChronoDuration {
    ChronoDuration::seconds(ttl.min(MAX_TTL_SECS) as i64)
}
