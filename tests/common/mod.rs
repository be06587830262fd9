//! Shared helpers for cache integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use llm_cache::cache::{CacheStore, MemoryStore};
use llm_cache::{Error, ErrorContext, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds, failing the test after ~2s.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Store wrapper whose operations can be switched to fail by name.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: Mutex<HashSet<&'static str>>,
    vanish_on_read: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            vanish_on_read: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, ops: &[&'static str]) {
        self.failing.lock().unwrap().extend(ops.iter().copied());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.vanish_on_read.store(false, Ordering::SeqCst);
    }

    /// Delete each key right after it is read, as a concurrent invalidation would.
    pub fn vanish_on_read(&self) {
        self.vanish_on_read.store(true, Ordering::SeqCst);
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.failing.lock().unwrap().contains(op) {
            Err(Error::store_with_context(
                "connection refused",
                ErrorContext::new().with_details(op).with_source("flaky_store"),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check("get")?;
        let value = self.inner.get(key).await?;
        if self.vanish_on_read.load(Ordering::SeqCst) {
            self.inner.delete(key).await?;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check("set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check("delete")?;
        self.inner.delete(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check("keys")?;
        self.inner.keys(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check("exists")?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check("expire")?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check("ttl")?;
        self.inner.ttl(key).await
    }

    async fn sadd(&self, set_key: &str, member: &str) -> Result<bool> {
        self.check("sadd")?;
        self.inner.sadd(set_key, member).await
    }

    async fn smembers(&self, set_key: &str) -> Result<HashSet<String>> {
        self.check("smembers")?;
        self.inner.smembers(set_key).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}
