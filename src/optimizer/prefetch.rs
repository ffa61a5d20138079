use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrefetchConfig {
    /// Queue bound; pushes beyond it are dropped.
    pub max_queue: usize,
    /// Wall-clock budget of one prefetch cycle.
    #[serde(rename = "cycle_budget_ms", with = "crate::config::duration_ms")]
    pub cycle_budget: Duration,
    #[serde(rename = "interval_ms", with = "crate::config::duration_ms")]
    pub interval: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_queue: 50,
            cycle_budget: Duration::from_secs(10),
            interval: Duration::from_secs(30),
        }
    }
}

/// Why a prefetch cycle may or may not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchGate {
    Open,
    BatteryLow,
    MemoryPressure,
    Offline,
    PoorNetwork,
}

impl PrefetchGate {
    pub fn is_open(&self) -> bool {
        matches!(self, PrefetchGate::Open)
    }
}

impl fmt::Display for PrefetchGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrefetchGate::Open => "open",
            PrefetchGate::BatteryLow => "battery low",
            PrefetchGate::MemoryPressure => "memory pressure",
            PrefetchGate::Offline => "offline",
            PrefetchGate::PoorNetwork => "poor network",
        })
    }
}

/// Bounded FIFO of URLs to warm, without duplicates.
pub struct PrefetchQueue {
    max: usize,
    urls: Mutex<VecDeque<String>>,
}

impl PrefetchQueue {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            urls: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns false if the URL is already queued or the queue is full.
    pub fn push(&self, url: impl Into<String>) -> bool {
        let url = url.into();
        let mut urls = self.urls.lock();
        if urls.len() >= self.max || urls.contains(&url) {
            return false;
        }
        urls.push_back(url);
        true
    }

    /// Remove up to `n` URLs from the front.
    pub fn take(&self, n: usize) -> Vec<String> {
        let mut urls = self.urls.lock();
        let n = n.min(urls.len());
        urls.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.urls.lock().clear();
    }
}
