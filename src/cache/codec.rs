//! Entry (de)serialization.
//!
//! Entries are stored as JSON objects. Timestamps use RFC 3339 with
//! nanosecond precision so a round trip through the store is lossless.
//! Only `key`, `value` and `created_at` are required when decoding; the
//! bookkeeping fields fall back to fresh-entry defaults.

use super::entry::CacheEntry;
use crate::{Error, ErrorContext, Result};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct WireEntryRef<'a, T> {
    key: &'a str,
    value: &'a T,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    access_count: u64,
    ttl: Option<u64>,
    tags: &'a [String],
    metadata: &'a BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct WireEntry<T> {
    key: String,
    value: T,
    created_at: DateTime<Utc>,
    #[serde(default)]
    accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    access_count: u64,
    #[serde(default)]
    ttl: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

/// Converts [`CacheEntry`] values to and from opaque store payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryCodec;

impl EntryCodec {
    pub fn encode<T: Serialize>(entry: &CacheEntry<T>) -> Result<Vec<u8>> {
        let wire = WireEntryRef {
            key: entry.key(),
            value: &entry.value,
            created_at: entry.created_at(),
            accessed_at: entry.accessed_at(),
            access_count: entry.access_count(),
            ttl: entry.ttl,
            tags: &entry.tags,
            metadata: &entry.metadata,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<CacheEntry<T>> {
        let wire: WireEntry<T> = serde_json::from_slice(payload).map_err(|e| {
            Error::deserialization_with_context(
                e.to_string(),
                ErrorContext::new()
                    .with_details(format!("{} byte payload", payload.len()))
                    .with_source("entry_codec"),
            )
        })?;
        Ok(CacheEntry::from_parts(
            wire.key,
            wire.value,
            wire.created_at,
            wire.accessed_at.unwrap_or(wire.created_at),
            wire.access_count,
            wire.ttl,
            wire.tags,
            wire.metadata,
        ))
    }

    /// Decode everything but the value. Used when ranking eviction candidates.
    pub fn decode_header(payload: &[u8]) -> Result<CacheEntry<IgnoredAny>> {
        Self::decode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn sample() -> CacheEntry<Value> {
        let created = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let mut entry = CacheEntry::new_at(
            "llm_cache_v2:gpt-4:0123456789abcdef0123456789abcdef",
            json!({"text": "Paris is the capital of France."}),
            Some(3600),
            created,
        )
        .with_tags(["geo", "faq"])
        .with_metadata("model", "gpt-4")
        .with_metadata("prompt_length", 27)
        .with_metadata("response_length", 31);
        entry.update_access_at(created + ChronoDuration::microseconds(1_500_001));
        entry
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let entry = sample();
        let payload = EntryCodec::encode(&entry).unwrap();
        let decoded: CacheEntry<Value> = EntryCodec::decode(&payload).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.created_at().timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_typed_value_round_trip() {
        let entry = CacheEntry::new("k", "plain text answer".to_string(), None);
        let payload = EntryCodec::encode(&entry).unwrap();
        let decoded: CacheEntry<String> = EntryCodec::decode(&payload).unwrap();
        assert_eq!(decoded.value, "plain text answer");
        assert_eq!(decoded.ttl, None);
    }

    #[test]
    fn test_optional_fields_default() {
        let payload = br#"{"key":"k","value":"v","created_at":"2024-01-01T00:00:00Z"}"#;
        let decoded: CacheEntry<String> = EntryCodec::decode(payload).unwrap();
        assert_eq!(decoded.accessed_at(), decoded.created_at());
        assert_eq!(decoded.access_count(), 0);
        assert!(decoded.tags.is_empty());
        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn test_missing_required_fields_fail() {
        for payload in [
            br#"{"value":"v","created_at":"2024-01-01T00:00:00Z"}"#.as_slice(),
            br#"{"key":"k","created_at":"2024-01-01T00:00:00Z"}"#.as_slice(),
            br#"{"key":"k","value":"v"}"#.as_slice(),
        ] {
            let err = EntryCodec::decode::<Value>(payload).unwrap_err();
            assert!(err.is_deserialization(), "unexpected error: {err}");
        }
    }

    #[test]
    fn test_malformed_payload_fails() {
        let err = EntryCodec::decode::<Value>(b"\x00not json").unwrap_err();
        assert!(err.is_deserialization());
        let err = EntryCodec::decode_header(b"[1,2,3]").unwrap_err();
        assert!(err.is_deserialization());
    }

    #[test]
    fn test_header_skips_value() {
        let entry = sample();
        let payload = EntryCodec::encode(&entry).unwrap();
        let header = EntryCodec::decode_header(&payload).unwrap();
        assert_eq!(header.key(), entry.key());
        assert_eq!(header.accessed_at(), entry.accessed_at());
        assert_eq!(header.access_count(), 1);
    }
}
