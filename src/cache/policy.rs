//! Admission policy and TTL selection for cache writes.

use super::eviction::{HIGH_HIT_RATE, LOW_HIT_RATE};

pub const MIN_RESPONSE_CHARS: usize = 10;
pub const MAX_RESPONSE_CHARS: usize = 100_000;
/// Responses longer than this are kept longer under the adaptive TTL.
pub const LARGE_RESPONSE_CHARS: usize = 10_000;
/// Upper bound for prompts asking about current or latest information.
pub const VOLATILE_TTL_SECS: u64 = 300;

const ERROR_MARKERS: [&str; 5] = ["error", "failed", "exception", "invalid", "rate_limit"];
const VOLATILE_MARKERS: [&str; 2] = ["current", "latest"];

/// Why a response was refused by [`should_cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    TooLong,
    ErrorMarker(&'static str),
}

/// Admission check on the stringified response. Lengths count characters.
pub fn should_cache(response: &str) -> Result<(), Rejection> {
    let len = response.chars().count();
    if len < MIN_RESPONSE_CHARS {
        return Err(Rejection::TooShort);
    }
    if len > MAX_RESPONSE_CHARS {
        return Err(Rejection::TooLong);
    }
    let lowered = response.to_lowercase();
    if let Some(marker) = ERROR_MARKERS.iter().find(|m| lowered.contains(*m)) {
        return Err(Rejection::ErrorMarker(marker));
    }
    Ok(())
}

/// Lifetime for a new entry when the caller gave none and the manager runs
/// the adaptive strategy.
pub fn adaptive_ttl(default_ttl: u64, prompt: &str, response_chars: usize, hit_rate: f64) -> u64 {
    let prompt = prompt.to_lowercase();
    let mut ttl = default_ttl as f64;
    if VOLATILE_MARKERS.iter().any(|m| prompt.contains(m)) {
        ttl = ttl.min(VOLATILE_TTL_SECS as f64);
    }
    if response_chars > LARGE_RESPONSE_CHARS {
        ttl *= 1.5;
    }
    if hit_rate > HIGH_HIT_RATE {
        ttl *= 1.2;
    } else if hit_rate < LOW_HIT_RATE {
        ttl *= 0.8;
    }
    ttl as u64
}
