//! Response caching.
//!
//! # Response Cache Module
//!
//! A count-bounded key/value store of prior responses with TTL expiry, a
//! selectable eviction strategy and optional persistence to durable storage.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Store, TTL checks, eviction, periodic sweep, metrics |
//! | [`CacheConfig`] | Capacity, default TTL, strategy, sweep interval |
//! | [`CacheEntry`] | Stored value plus timestamp / ttl / hits / size / metadata |
//! | [`EvictionStrategy`] | LRU, LFU, FIFO or priority ranking |
//! | [`CacheStorage`] | Durable blob store ([`FileStorage`], [`MemoryStorage`]) |
//! | [`CacheKeyGenerator`] | Request signature used as cache key and dedup identity |
//!
//! ## Example
//!
//! ```rust
//! use adaptive_request::cache::{CacheConfig, CacheManager, EvictionStrategy};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let cache = CacheManager::new(
//!     CacheConfig::new()
//!         .with_max_items(500)
//!         .with_strategy(EvictionStrategy::Lfu)
//!         .with_default_ttl(Duration::from_secs(60)),
//! );
//! cache.set("GET https://api.example.com/items", json!([1, 2, 3]), None, None);
//! assert!(cache.get("GET https://api.example.com/items").is_some());
//! ```
//!
//! ## Keys
//!
//! Keys stay human-readable (`METHOD url#digest`) so that
//! [`CacheManager::invalidate_pattern`] can match on URL fragments after a
//! mutation.

mod entry;
mod eviction;
mod key;
mod manager;
mod storage;

pub use entry::{CacheEntry, EntryMetadata};
pub use eviction::{EvictionStrategy, EVICTION_PERCENT};
pub use key::{canonical_signature, CacheKeyGenerator, KeyFn};
pub use manager::{CacheConfig, CacheManager, CacheMetrics};
pub use storage::{CacheStorage, FileStorage, MemoryStorage};
