//! Cache store abstraction and the in-process implementation.

use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Key-value store the cache is layered on (Redis-shaped).
///
/// Implementations must be safe for concurrent use and honour store-level
/// expiry: a key whose expiry has passed behaves as if it was deleted.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Store `value`, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Remaining lifetime; `None` for missing keys and keys without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    async fn sadd(&self, set_key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, set_key: &str) -> Result<HashSet<String>>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-process store with lazy expiry.
///
/// Suitable for single-process deployments and tests; cloning shares the
/// underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (entries and sets).
    pub fn len(&self) -> Result<usize> {
        let now = Instant::now();
        let slots = self.write()?;
        Ok(slots.values().filter(|s| !s.is_expired(now)).count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Slot>>> {
        self.slots.write().map_err(|_| {
            Error::store_with_context(
                "memory store lock poisoned",
                ErrorContext::new().with_source("memory_store"),
            )
        })
    }

    /// Live slot for `key`, dropping it first if it has expired.
    fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
        let now = Instant::now();
        if slots.get(key).map(|s| s.is_expired(now)).unwrap_or(false) {
            slots.remove(key);
            return None;
        }
        slots.get_mut(key)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::store_with_context(
        "operation against a key holding the wrong kind of value",
        ErrorContext::new()
            .with_details(key.to_string())
            .with_source("memory_store"),
    )
}

/// Translate a Redis-style glob into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'^') || chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if closed && class.len() > 1 {
                    class.push(']');
                    out.push_str(&class);
                } else {
                    out.push_str(&regex::escape(&class));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| {
        Error::store_with_context(
            format!("invalid key pattern: {}", e),
            ErrorContext::new()
                .with_details(pattern.to_string())
                .with_source("memory_store"),
        )
    })
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut slots = self.write()?;
        match Self::live(&mut slots, key) {
            None => Ok(None),
            Some(Slot {
                value: StoredValue::Bytes(data),
                ..
            }) => Ok(Some(data.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        // A deadline past what `Instant` can represent means no expiry.
        let expires_at = ttl.and_then(|t| Instant::now().checked_add(t));
        self.write()?.insert(
            key.to_string(),
            Slot {
                value: StoredValue::Bytes(value.to_vec()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut slots = self.write()?;
        let live = Self::live(&mut slots, key).is_some();
        slots.remove(key);
        Ok(live)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut slots = self.write()?;
        slots.retain(|_, slot| !slot.is_expired(now));
        let mut keys: Vec<String> = slots
            .keys()
            .filter(|k| matcher.is_match(k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut slots = self.write()?;
        Ok(Self::live(&mut slots, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut slots = self.write()?;
        match Self::live(&mut slots, key) {
            Some(slot) => {
                slot.expires_at = Instant::now().checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut slots = self.write()?;
        let now = Instant::now();
        Ok(Self::live(&mut slots, key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn sadd(&self, set_key: &str, member: &str) -> Result<bool> {
        let mut slots = self.write()?;
        if Self::live(&mut slots, set_key).is_none() {
            slots.insert(
                set_key.to_string(),
                Slot {
                    value: StoredValue::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        match slots.get_mut(set_key) {
            Some(Slot {
                value: StoredValue::Set(members),
                ..
            }) => Ok(members.insert(member.to_string())),
            _ => Err(wrong_type(set_key)),
        }
    }

    async fn smembers(&self, set_key: &str) -> Result<HashSet<String>> {
        let mut slots = self.write()?;
        match Self::live(&mut slots, set_key) {
            None => Ok(HashSet::new()),
            Some(Slot {
                value: StoredValue::Set(members),
                ..
            }) => Ok(members.clone()),
            Some(_) => Err(wrong_type(set_key)),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", b"1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(store.exists("a").await.unwrap());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry_is_enforced() {
        let store = MemoryStore::new();
        store
            .set("short", b"x", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("long", b"y", None).await.unwrap();
        assert!(store.ttl("short").await.unwrap().is_some());
        assert_eq!(store.ttl("long").await.unwrap(), None);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(!store.exists("short").await.unwrap());
        assert_eq!(store.keys("*").await.unwrap(), vec!["long".to_string()]);
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
        store.set("k", b"v", None).await.unwrap();
        assert!(store.expire("k", Duration::from_secs(5)).await.unwrap());
        let ttl = store.ttl("k").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(5) && ttl > Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_never_expires() {
        let store = MemoryStore::new();
        store.set("k", b"v", Some(Duration::MAX)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.ttl("k").await.unwrap(), None);

        store.set("j", b"v", Some(Duration::from_secs(5))).await.unwrap();
        assert!(store.expire("j", Duration::MAX).await.unwrap());
        assert!(store.exists("j").await.unwrap());
        assert_eq!(store.ttl("j").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        assert!(store.sadd("tag", "a").await.unwrap());
        assert!(store.sadd("tag", "b").await.unwrap());
        assert!(!store.sadd("tag", "a").await.unwrap());
        let members = store.smembers("tag").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains("a") && members.contains("b"));
        assert!(store.smembers("none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.sadd("set", "a").await.unwrap();
        store.set("bytes", b"v", None).await.unwrap();
        assert!(store.get("set").await.unwrap_err().is_store());
        assert!(store.sadd("bytes", "a").await.unwrap_err().is_store());
        assert!(store.smembers("bytes").await.unwrap_err().is_store());
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let store = MemoryStore::new();
        for key in ["llm_cache_v2:gpt-4:aa", "llm_cache_v2:claude:bb", "llm_tag:t1", "other"] {
            store.set(key, b"v", None).await.unwrap();
        }
        assert_eq!(
            store.keys("llm_cache_v2:*").await.unwrap(),
            vec!["llm_cache_v2:claude:bb", "llm_cache_v2:gpt-4:aa"]
        );
        assert_eq!(
            store.keys("llm_cache_v2:gpt-?:*").await.unwrap(),
            vec!["llm_cache_v2:gpt-4:aa"]
        );
        assert_eq!(store.keys("llm_[ct]*").await.unwrap().len(), 3);
        assert_eq!(store.keys("*").await.unwrap().len(), 4);
        assert!(store.keys("nothing*").await.unwrap().is_empty());
    }

    #[test]
    fn test_glob_translation() {
        assert!(glob_to_regex("a.b").unwrap().is_match("a.b"));
        assert!(!glob_to_regex("a.b").unwrap().is_match("axb"));
        assert!(glob_to_regex("h[ae]llo").unwrap().is_match("hallo"));
        assert!(!glob_to_regex("h[^e]llo").unwrap().is_match("hello"));
        assert!(glob_to_regex("h\\*").unwrap().is_match("h*"));
        assert!(!glob_to_regex("h\\*").unwrap().is_match("hx"));
        assert!(glob_to_regex("x[").unwrap().is_match("x["));
    }

    #[tokio::test]
    async fn test_len_and_clear() {
        let store = MemoryStore::new();
        assert!(store.is_empty().unwrap());
        store.set("a", b"1", None).await.unwrap();
        store.sadd("s", "m").await.unwrap();
        assert_eq!(store.len().unwrap(), 2);
        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
