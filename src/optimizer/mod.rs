//! Execution planning.
//!
//! # Request Optimizer Module
//!
//! Decides how a request runs, never whether: it computes the signature used
//! for caching and deduplication, the adjusted priority, the adaptive timeout
//! and retry budget, and whether the body should be compressed. It never
//! touches the network itself.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RequestOptimizer`] | Turns a descriptor into an [`ExecutionPlan`] |
//! | [`InFlightRequests`] | Shares one pending result between identical calls |
//! | [`BatchQueue`] | Coalesces requests sharing a batch key |
//! | [`adjust_priority`] / [`prioritize`] | Battery- and network-aware priority passes |
//! | [`PrefetchQueue`] | Bounded list of URLs to warm in the background |
//! | [`DeviceSignals`] | Battery / memory-pressure source |

mod batch;
mod dedup;
mod device;
mod prefetch;
mod priority;

pub use batch::{
    batch_body, split_batch_response, BatchConfig, BatchDispatch, BatchQueue, SubRequest,
};
pub use dedup::{InFlightRequests, Joined, SharedResponse};
pub use device::{DeviceSignals, DeviceStatus, MemoryPressure, StaticDevice};
pub use prefetch::{PrefetchConfig, PrefetchGate, PrefetchQueue};
pub use priority::{adjust_priority, prioritize, PriorityContext};

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKeyGenerator, CacheManager};
use crate::network::NetworkMonitor;
use crate::types::{Method, Priority, RequestDescriptor};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Batch size at excellent quality; scaled down as quality degrades.
    pub base_batch_size: usize,
    /// Battery level below which reads are demoted and prefetch stops.
    pub battery_low_threshold: f64,
    /// Bodies larger than this (bytes) are compressed on non-GET requests.
    pub compression_threshold: usize,
    pub batch: BatchConfig,
    pub prefetch: PrefetchConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            base_batch_size: 10,
            battery_low_threshold: 0.2,
            compression_threshold: 1024,
            batch: BatchConfig::default(),
            prefetch: PrefetchConfig::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_battery_low_threshold(mut self, threshold: f64) -> Self {
        self.battery_low_threshold = threshold;
        self
    }
}

/// How one attempt sequence of a request should run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub signature: String,
    pub priority: Priority,
    pub timeout: Duration,
    pub max_retries: u32,
    pub compress: bool,
}

pub struct RequestOptimizer {
    config: OptimizerConfig,
    monitor: Arc<NetworkMonitor>,
    cache: Arc<CacheManager>,
    device: Arc<dyn DeviceSignals>,
    keys: CacheKeyGenerator,
    inflight: InFlightRequests,
    prefetch: PrefetchQueue,
}

impl RequestOptimizer {
    pub fn new(
        config: OptimizerConfig,
        monitor: Arc<NetworkMonitor>,
        cache: Arc<CacheManager>,
        device: Arc<dyn DeviceSignals>,
    ) -> Self {
        let prefetch = PrefetchQueue::new(config.prefetch.max_queue);
        Self {
            config,
            monitor,
            cache,
            device,
            keys: CacheKeyGenerator::new(),
            inflight: InFlightRequests::new(),
            prefetch,
        }
    }

    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Cache key and dedup identity of a descriptor.
    pub fn signature(&self, descriptor: &RequestDescriptor) -> String {
        self.keys.generate(descriptor)
    }

    pub fn priority_context(&self) -> PriorityContext {
        PriorityContext {
            battery_low: self
                .device
                .status()
                .is_battery_low(self.config.battery_low_threshold),
            quality: self.monitor.quality(),
        }
    }

    pub fn adjust_priority(&self, descriptor: &RequestDescriptor) -> Priority {
        adjust_priority(descriptor, self.priority_context())
    }

    pub fn prioritize(&self, descriptors: Vec<RequestDescriptor>) -> Vec<RequestDescriptor> {
        prioritize(descriptors, self.priority_context())
    }

    /// `base` scaled by the current quality tier (1x / 1.5x / 2x / 3x).
    pub fn adaptive_timeout(&self, base: Duration) -> Duration {
        base.mul_f64(self.monitor.quality().timeout_multiplier())
    }

    /// Base batch size scaled down stepwise as quality degrades; at least 1.
    pub fn optimal_batch_size(&self) -> usize {
        let scaled = self.config.base_batch_size as f64 * self.monitor.quality().batch_multiplier();
        (scaled.round() as usize).max(1)
    }

    pub fn should_compress(&self, descriptor: &RequestDescriptor) -> bool {
        descriptor.method != Method::Get && descriptor.body_size() > self.config.compression_threshold
    }

    pub fn plan(&self, descriptor: &RequestDescriptor, base_timeout: Duration) -> ExecutionPlan {
        let recommended = self.monitor.recommended_config();
        ExecutionPlan {
            signature: self.signature(descriptor),
            priority: self.adjust_priority(descriptor),
            timeout: self.adaptive_timeout(descriptor.timeout.unwrap_or(base_timeout)),
            max_retries: descriptor.max_retries.unwrap_or(recommended.retry_count),
            compress: self.should_compress(descriptor),
        }
    }

    pub fn inflight(&self) -> &InFlightRequests {
        &self.inflight
    }

    /// The batch key to coalesce under, when batching is enabled.
    pub fn batch_key<'a>(&self, descriptor: &'a RequestDescriptor) -> Option<&'a str> {
        if !self.config.batch.enabled {
            return None;
        }
        descriptor.batch_key.as_deref()
    }

    pub fn queue_prefetch(&self, url: impl Into<String>) -> bool {
        self.prefetch.push(url)
    }

    pub fn prefetch_queue(&self) -> &PrefetchQueue {
        &self.prefetch
    }

    /// Checked fresh before every cycle.
    pub fn prefetch_gate(&self) -> PrefetchGate {
        let device = self.device.status();
        if device.is_battery_low(self.config.battery_low_threshold) {
            return PrefetchGate::BatteryLow;
        }
        if device.is_memory_constrained() {
            return PrefetchGate::MemoryPressure;
        }
        let info = self.monitor.current_info();
        if !info.online {
            return PrefetchGate::Offline;
        }
        if info.quality.is_poor_or_worse() {
            return PrefetchGate::PoorNetwork;
        }
        PrefetchGate::Open
    }

    /// Next slice of prefetch work, skipping URLs whose response is already cached.
    pub fn next_prefetch_batch(&self) -> Vec<RequestDescriptor> {
        self.prefetch
            .take(self.optimal_batch_size())
            .into_iter()
            .map(|url| RequestDescriptor::get(url).priority(Priority::Low))
            .filter(|d| !self.cache.has(&self.signature(d)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::network::{ConnectionSignals, EffectiveType, NetworkMonitorConfig};
    use serde_json::json;

    fn signals(downlink: f64, rtt: f64, effective_type: EffectiveType) -> ConnectionSignals {
        ConnectionSignals {
            online: true,
            effective_type,
            downlink_mbps: downlink,
            rtt_ms: rtt,
            save_data: false,
        }
    }

    fn optimizer() -> (RequestOptimizer, Arc<NetworkMonitor>, Arc<StaticDevice>, Arc<CacheManager>) {
        let monitor = Arc::new(NetworkMonitor::new(NetworkMonitorConfig::default()));
        let device = Arc::new(StaticDevice::default());
        let cache = Arc::new(CacheManager::new(CacheConfig::default()));
        let opt = RequestOptimizer::new(
            OptimizerConfig::default(),
            monitor.clone(),
            cache.clone(),
            device.clone(),
        );
        (opt, monitor, device, cache)
    }

    #[test]
    fn plan_scales_with_quality() {
        let (opt, monitor, _, _) = optimizer();
        monitor.update(signals(12.0, 80.0, EffectiveType::FourG));
        let d = RequestDescriptor::post("/api/ask", json!({"question": "hi"}));
        let plan = opt.plan(&d, Duration::from_secs(10));
        assert_eq!(plan.timeout, Duration::from_secs(10));
        assert_eq!(plan.max_retries, 2);
        assert_eq!(plan.priority, Priority::Normal);

        monitor.update(signals(6.0, 200.0, EffectiveType::FourG));
        let plan = opt.plan(&d, Duration::from_secs(10));
        assert_eq!(plan.timeout, Duration::from_secs(15));
        assert_eq!(plan.max_retries, 3);
        assert_eq!(plan.priority, Priority::High);
        assert_eq!(plan.signature, opt.signature(&d));
    }

    #[test]
    fn explicit_retry_budget_wins() {
        let (opt, _, _, _) = optimizer();
        let d = RequestDescriptor::get("/a").max_retries(0);
        assert_eq!(opt.plan(&d, Duration::from_secs(1)).max_retries, 0);
    }

    #[test]
    fn batch_size_shrinks_stepwise() {
        let (opt, monitor, _, _) = optimizer();
        monitor.update(signals(12.0, 80.0, EffectiveType::FourG));
        assert_eq!(opt.optimal_batch_size(), 10);
        monitor.update(signals(6.0, 200.0, EffectiveType::FourG));
        assert_eq!(opt.optimal_batch_size(), 8);
        monitor.update(signals(2.0, 800.0, EffectiveType::FourG));
        assert_eq!(opt.optimal_batch_size(), 6);
        monitor.update(signals(0.5, 2000.0, EffectiveType::TwoG));
        assert_eq!(opt.optimal_batch_size(), 4);
    }

    #[test]
    fn compression_only_for_large_non_get_bodies() {
        let (opt, _, _, _) = optimizer();
        let big = json!({ "blob": "x".repeat(2048) });
        assert!(opt.should_compress(&RequestDescriptor::post("/a", big.clone())));
        assert!(!opt.should_compress(&RequestDescriptor::get("/a").body(big)));
        assert!(!opt.should_compress(&RequestDescriptor::post("/a", json!({"q": 1}))));
    }

    #[test]
    fn prefetch_gate_is_checked_fresh() {
        let (opt, monitor, device, _) = optimizer();
        monitor.update(signals(12.0, 80.0, EffectiveType::FourG));
        assert_eq!(opt.prefetch_gate(), PrefetchGate::Open);
        device.set_battery(0.1, false);
        assert_eq!(opt.prefetch_gate(), PrefetchGate::BatteryLow);
        device.set_battery(0.9, false);
        device.set_memory_pressure(MemoryPressure::High);
        assert_eq!(opt.prefetch_gate(), PrefetchGate::MemoryPressure);
        device.set_memory_pressure(MemoryPressure::Normal);
        monitor.set_online(false);
        assert_eq!(opt.prefetch_gate(), PrefetchGate::Offline);
        monitor.update(signals(0.5, 2000.0, EffectiveType::TwoG));
        assert_eq!(opt.prefetch_gate(), PrefetchGate::PoorNetwork);
    }

    #[test]
    fn prefetch_batch_skips_cached_urls() {
        let (opt, _, _, cache) = optimizer();
        assert!(opt.queue_prefetch("/warm"));
        assert!(opt.queue_prefetch("/cold"));
        cache.set(opt.signature(&RequestDescriptor::get("/warm")), json!(1), None, None);
        let batch = opt.next_prefetch_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].url, "/cold");
        assert_eq!(batch[0].priority, Some(Priority::Low));
    }

    #[test]
    fn batching_is_opt_in() {
        let (opt, _, _, _) = optimizer();
        let d = RequestDescriptor::get("/a").batch_key("users");
        assert_eq!(opt.batch_key(&d), None);
    }
}
