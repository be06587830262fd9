//! # llm-cache
//!
//! Response cache engine for LLM applications.
//!
//! ## Overview
//!
//! Repeated prompts against the same model with the same parameters are
//! answered from a shared key-value store instead of the provider. The cache
//! decides what is worth keeping, how long to keep it, and what to drop when
//! it grows past its capacity.
//!
//! ## Core Philosophy
//!
//! - **Never in the way**: a cache failure is a miss or a refused write,
//!   never an error the caller has to handle
//! - **Store-agnostic**: the store is an injected [`cache::CacheStore`];
//!   [`cache::MemoryStore`] is provided for single-process use
//! - **Eventually consistent invalidation**: invalidations are queued and
//!   applied by a background worker
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Cache manager, store trait, eviction, statistics |
//! | [`error`] | Error type and structured error context |

pub mod cache;

pub use cache::{CacheConfig, CacheManager, CacheStats, EvictionStrategy, MemoryStore};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
