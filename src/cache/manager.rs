//! Cache manager.

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::entry::{CacheEntry, EntryMetadata};
use super::eviction::EvictionStrategy;
use super::storage::{CacheStorage, FileStorage};
use crate::clock::{self, SharedClock};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of entries; exceeding it triggers an eviction pass.
    pub max_items: usize,
    #[serde(rename = "default_ttl_ms", with = "crate::config::duration_ms")]
    pub default_ttl: Duration,
    pub strategy: EvictionStrategy,
    #[serde(rename = "sweep_interval_ms", with = "crate::config::duration_ms")]
    pub sweep_interval: Duration,
    /// Persist to `path` after each sweep and load it on startup.
    pub persist: bool,
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 100,
            default_ttl: Duration::from_secs(300),
            strategy: EvictionStrategy::Lru,
            sweep_interval: Duration::from_secs(60),
            persist: false,
            path: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist = true;
        self.path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Total serialized size of live entries, in bytes.
    pub size: usize,
    pub item_count: usize,
    pub hit_rate: f64,
    pub eviction_count: u64,
    /// Entries removed because their TTL elapsed.
    pub cleanup_count: u64,
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    cleanups: u64,
}

impl Store {
    fn purge_expired(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_valid(now));
        let removed = before - self.entries.len();
        self.cleanups += removed as u64;
        removed
    }
}

/// Bounded response store.
///
/// Every operation completes under one short lock, so callers never observe
/// a half-applied mutation.
pub struct CacheManager {
    config: CacheConfig,
    store: Mutex<Store>,
    storage: Option<Arc<dyn CacheStorage>>,
    clock: SharedClock,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Self {
        let storage: Option<Arc<dyn CacheStorage>> = match (&config.path, config.persist) {
            (Some(path), true) => Some(Arc::new(FileStorage::new(path.clone()))),
            _ => None,
        };
        let manager = Self {
            config,
            store: Mutex::new(Store::default()),
            storage,
            clock,
        };
        manager.load_persisted();
        manager
    }

    /// Replace the storage backend and load whatever it holds.
    pub fn with_storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.storage = Some(storage);
        self.store = Mutex::new(Store::default());
        self.load_persisted();
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Valid entry for `key`, recording a hit or miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        let mut guard = self.store.lock();
        let store = &mut *guard;
        let valid = store.entries.get(key).map(|e| e.is_valid(now));
        match valid {
            Some(true) => {
                let entry = store.entries.get_mut(key)?;
                entry.hits += 1;
                entry.last_accessed = now;
                store.hits += 1;
                Some(entry.clone())
            }
            Some(false) => {
                store.entries.remove(key);
                store.cleanups += 1;
                store.misses += 1;
                None
            }
            None => {
                store.misses += 1;
                None
            }
        }
    }

    pub fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        self.get(key).map(|e| e.data)
    }

    pub fn set(
        &self,
        key: impl Into<String>,
        data: serde_json::Value,
        ttl: Option<Duration>,
        metadata: Option<EntryMetadata>,
    ) {
        if self.config.max_items == 0 {
            return;
        }
        let key = key.into();
        let now = self.clock.now_ms();
        let ttl_ms = ttl.unwrap_or(self.config.default_ttl).as_millis() as u64;
        let mut guard = self.store.lock();
        let store = &mut *guard;
        let mut entry = CacheEntry::new(data, now, ttl_ms, store.next_sequence);
        entry.metadata = metadata;
        store.next_sequence += 1;
        store.entries.insert(key.clone(), entry);
        self.enforce_capacity(store, now, Some(&key));
    }

    fn enforce_capacity(&self, store: &mut Store, now: u64, protect: Option<&str>) {
        if store.entries.len() <= self.config.max_items {
            return;
        }
        store.purge_expired(now);
        while store.entries.len() > self.config.max_items {
            let victims = self.config.strategy.select_victims(&store.entries, protect);
            if victims.is_empty() {
                break;
            }
            for key in &victims {
                store.entries.remove(key);
            }
            store.evictions += victims.len() as u64;
            debug!(
                strategy = ?self.config.strategy,
                evicted = victims.len(),
                remaining = store.entries.len(),
                "cache eviction pass"
            );
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.lock().entries.remove(key).is_some()
    }

    /// Expiry-aware presence check; does not count as a hit or miss.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let mut store = self.store.lock();
        match store.entries.get(key).map(|e| e.is_valid(now)) {
            Some(true) => true,
            Some(false) => {
                store.entries.remove(key);
                store.cleanups += 1;
                false
            }
            None => false,
        }
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let store = self.store.lock();
        let mut keys: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, e)| e.is_valid(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Live values, in key order.
    pub fn values(&self) -> Vec<serde_json::Value> {
        let now = self.clock.now_ms();
        let store = self.store.lock();
        let mut live: Vec<(&String, &CacheEntry)> = store
            .entries
            .iter()
            .filter(|(_, e)| e.is_valid(now))
            .collect();
        live.sort_by(|a, b| a.0.cmp(b.0));
        live.into_iter().map(|(_, e)| e.data.clone()).collect()
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.store
            .lock()
            .entries
            .values()
            .filter(|e| e.is_valid(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the live entry for `key`.
    pub fn entry_age(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        self.store
            .lock()
            .entries
            .get(key)
            .filter(|e| e.is_valid(now))
            .map(|e| Duration::from_millis(e.age_ms(now)))
    }

    /// Remove every key accepted by `matcher`; returns how many were removed.
    pub fn invalidate_pattern<F>(&self, matcher: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut store = self.store.lock();
        let before = store.entries.len();
        store.entries.retain(|k, _| !matcher(k));
        let removed = before - store.entries.len();
        if removed > 0 {
            debug!(removed, "cache invalidation");
        }
        removed
    }

    pub fn invalidate_regex(&self, pattern: &Regex) -> usize {
        self.invalidate_pattern(|k| pattern.is_match(k))
    }

    pub fn clear(&self) {
        self.store.lock().entries.clear();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.clear() {
                warn!(error = %e, "failed to clear persisted cache");
            }
        }
    }

    /// Remove expired entries and persist the survivors. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let removed = self.store.lock().purge_expired(now);
        if removed > 0 {
            debug!(removed, "cache sweep");
        }
        self.persist();
        removed
    }

    /// Persist the current live set immediately.
    pub fn flush(&self) -> crate::Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let blob = serde_json::to_string(&self.store.lock().entries)?;
        storage.save(&blob)
    }

    fn persist(&self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to persist cache");
        }
    }

    fn load_persisted(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let blob = match storage.load() {
            Ok(Some(blob)) => blob,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, backend = storage.name(), "failed to read persisted cache");
                return;
            }
        };
        let raw: HashMap<String, serde_json::Value> = match serde_json::from_str(&blob) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted cache");
                let _ = storage.clear();
                return;
            }
        };
        let now = self.clock.now_ms();
        let mut loaded: Vec<(String, CacheEntry)> = raw
            .into_iter()
            .filter_map(|(k, v)| {
                serde_json::from_value::<CacheEntry>(v)
                    .ok()
                    .filter(|e| e.is_valid_entry(now))
                    .map(|e| (k, e))
            })
            .collect();
        loaded.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(&b.0)));

        let mut guard = self.store.lock();
        let store = &mut *guard;
        let count = loaded.len();
        for (key, mut entry) in loaded {
            entry.sequence = store.next_sequence;
            entry.last_accessed = entry.timestamp;
            store.next_sequence += 1;
            store.entries.insert(key, entry);
        }
        self.enforce_capacity(store, now, None);
        debug!(loaded = count, backend = storage.name(), "restored persisted cache");
    }

    pub fn metrics(&self) -> CacheMetrics {
        let now = self.clock.now_ms();
        let store = self.store.lock();
        let live: Vec<&CacheEntry> = store.entries.values().filter(|e| e.is_valid(now)).collect();
        let lookups = store.hits + store.misses;
        CacheMetrics {
            hits: store.hits,
            misses: store.misses,
            size: live.iter().map(|e| e.size).sum(),
            item_count: live.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                store.hits as f64 / lookups as f64
            },
            eviction_count: store.evictions,
            cleanup_count: store.cleanups,
        }
    }

    /// Periodic TTL sweep; ends once the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep();
            }
        })
    }
}
