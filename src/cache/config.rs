//! Cache configuration.

use super::eviction::EvictionStrategy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_KEY_PREFIX: &str = "llm_cache_v2:";
pub const DEFAULT_TAG_PREFIX: &str = "llm_tag:";
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(300);

/// Construction parameters for [`super::CacheManager`].
///
/// Can be built in code, loaded from YAML, or overlaid from env:
/// - `LLM_CACHE_STRATEGY` (`ttl` | `lru` | `lfu` | `adaptive`)
/// - `LLM_CACHE_MAX_SIZE`
/// - `LLM_CACHE_DEFAULT_TTL` (seconds)
/// - `LLM_CACHE_EVICTION_INTERVAL_SECS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub strategy: EvictionStrategy,
    pub max_size: u64,
    /// Seconds.
    pub default_ttl: u64,
    pub key_prefix: String,
    pub tag_prefix: String,
    /// Period of the background capacity check.
    #[serde(with = "duration_secs")]
    pub eviction_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: EvictionStrategy::Adaptive,
            max_size: 1000,
            default_ttl: 3600,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl = secs;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Defaults overlaid with `LLM_CACHE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_var("LLM_CACHE_STRATEGY") {
            config.strategy = v.parse()?;
        }
        if let Some(v) = env_var("LLM_CACHE_MAX_SIZE") {
            config.max_size = parse_env("LLM_CACHE_MAX_SIZE", &v)?;
        }
        if let Some(v) = env_var("LLM_CACHE_DEFAULT_TTL") {
            config.default_ttl = parse_env("LLM_CACHE_DEFAULT_TTL", &v)?;
        }
        if let Some(v) = env_var("LLM_CACHE_EVICTION_INTERVAL_SECS") {
            let secs: f64 = parse_env("LLM_CACHE_EVICTION_INTERVAL_SECS", &v)?;
            config.eviction_interval = Duration::try_from_secs_f64(secs).map_err(|e| {
                invalid("LLM_CACHE_EVICTION_INTERVAL_SECS", e.to_string())
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid cache config: {}", e),
                ErrorContext::new().with_source("cache_config"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(invalid("max_size", "must be greater than zero"));
        }
        if self.key_prefix.is_empty() {
            return Err(invalid("key_prefix", "must not be empty"));
        }
        if self.tag_prefix.is_empty() {
            return Err(invalid("tag_prefix", "must not be empty"));
        }
        if self.key_prefix == self.tag_prefix {
            return Err(invalid("tag_prefix", "must differ from key_prefix"));
        }
        if self.eviction_interval.is_zero() {
            return Err(invalid("eviction_interval", "must be greater than zero"));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| invalid(name, format!("{} ({:?})", e, raw)))
}

fn invalid(field: &str, details: impl Into<String>) -> Error {
    Error::configuration_with_context(
        "invalid cache configuration",
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("cache_config"),
    )
}

mod duration_secs {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
