use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::entry::CacheEntry;

/// Share of entries (in percent) removed per eviction pass.
pub const EVICTION_PERCENT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Oldest `timestamp` first.
    #[default]
    Lru,
    /// Fewest hits first.
    Lfu,
    /// Oldest insertion first.
    Fifo,
    /// Lowest `metadata.priority` first.
    Priority,
}

impl EvictionStrategy {
    fn rank(&self, entry: &CacheEntry) -> (i128, u64) {
        match self {
            EvictionStrategy::Lru => (entry.timestamp as i128, entry.sequence),
            EvictionStrategy::Lfu => (entry.hits as i128, entry.last_accessed),
            EvictionStrategy::Fifo => (entry.sequence as i128, 0),
            EvictionStrategy::Priority => (entry.priority() as i128, entry.sequence),
        }
    }

    /// Keys of the lowest-ranked `EVICTION_PERCENT` of `entries` (at least one),
    /// never including `protect`.
    pub fn select_victims(
        &self,
        entries: &HashMap<String, CacheEntry>,
        protect: Option<&str>,
    ) -> Vec<String> {
        let count = (entries.len() * EVICTION_PERCENT).div_ceil(100).max(1);
        let mut ranked: Vec<(&String, (i128, u64))> = entries
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != protect)
            .map(|(k, e)| (k, self.rank(e)))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(count)
            .map(|(k, _)| k.clone())
            .collect()
    }
}
