use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optional per-entry hints. `priority` drives the priority eviction strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EntryMetadata {
    pub fn with_priority(priority: i64) -> Self {
        Self {
            priority: Some(priority),
            extra: BTreeMap::new(),
        }
    }
}

/// One cached value.
///
/// The serialized form (`data`, `timestamp`, `ttl`, `hits`, `size`,
/// `metadata`) is exactly what gets persisted; access order and insertion
/// sequence are rebuilt on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    /// Creation time, ms since epoch.
    pub timestamp: u64,
    /// Time-to-live in ms.
    pub ttl: u64,
    #[serde(default)]
    pub hits: u64,
    /// Serialized size of `data` in bytes.
    #[serde(default)]
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
    #[serde(skip)]
    pub(crate) last_accessed: u64,
    #[serde(skip)]
    pub(crate) sequence: u64,
}

impl CacheEntry {
    pub fn new(data: serde_json::Value, now_ms: u64, ttl_ms: u64, sequence: u64) -> Self {
        let size = serde_json::to_vec(&data).map(|v| v.len()).unwrap_or(0);
        Self {
            data,
            timestamp: now_ms,
            ttl: ttl_ms,
            hits: 0,
            size,
            metadata: None,
            last_accessed: now_ms,
            sequence,
        }
    }

    /// Valid iff `now < timestamp + ttl`.
    pub fn is_valid(&self, now_ms: u64) -> bool {
        now_ms < self.timestamp.saturating_add(self.ttl)
    }

    /// Sanity check applied to entries loaded from storage.
    pub fn is_valid_entry(&self, now_ms: u64) -> bool {
        self.ttl > 0 && self.timestamp <= now_ms && self.is_valid(now_ms)
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }

    pub fn priority(&self) -> i64 {
        self.metadata.as_ref().and_then(|m| m.priority).unwrap_or(0)
    }
}
