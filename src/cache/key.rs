//! Cache key generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex characters of the digest kept in the key suffix.
pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Fully-qualified store key: `{prefix}{model}:{digest}`.
    pub key: String,
    pub model: String,
    pub digest: String,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

/// Derives deterministic keys from `(prompt, model, params)`.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    prefix: String,
}

impl CacheKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn generate(&self, prompt: &str, model: &str, params: &Value) -> CacheKey {
        let payload = serde_json::json!({
            "prompt": prompt,
            "model": model,
            "params": params,
        });
        let canonical = canonical_json(&payload);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        let digest = hash[..DIGEST_LEN].to_string();
        CacheKey {
            key: format!("{}{}:{}", self.prefix, model, digest),
            model: model.to_string(),
            digest,
        }
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_KEY_PREFIX)
    }
}

/// Compact JSON with object keys sorted at every depth.
///
/// Independent of the map's insertion order, so logically equal params
/// always hash the same.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
