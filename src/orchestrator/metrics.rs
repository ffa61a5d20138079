use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

/// Rolling request counters. Cleared only by an explicit reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub cancelled_count: u64,
    pub retry_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_bytes: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub cache_hit_rate: f64,
    /// Exponential moving average of network throughput.
    pub bandwidth_kbps: f64,
}

impl PerformanceMetrics {
    /// Requests that finished one way or the other; cancellations don't count.
    pub fn completed(&self) -> u64 {
        self.success_count + self.error_count
    }
}

const BANDWIDTH_SMOOTHING: f64 = 0.3;

#[derive(Default)]
struct Totals {
    metrics: PerformanceMetrics,
    latency_total_ms: f64,
    latency_samples: u64,
}

impl Totals {
    fn refresh_rates(&mut self) {
        let m = &mut self.metrics;
        let done = m.success_count + m.error_count;
        m.success_rate = if done == 0 {
            0.0
        } else {
            m.success_count as f64 / done as f64
        };
        let lookups = m.cache_hits + m.cache_misses;
        m.cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            m.cache_hits as f64 / lookups as f64
        };
        m.average_latency_ms = if self.latency_samples == 0 {
            0.0
        } else {
            self.latency_total_ms / self.latency_samples as f64
        };
    }
}

#[derive(Default)]
pub struct MetricsRecorder {
    totals: Mutex<Totals>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        let mut t = self.totals.lock();
        t.metrics.cache_hits += 1;
        t.refresh_rates();
    }

    pub fn record_cache_miss(&self) {
        let mut t = self.totals.lock();
        t.metrics.cache_misses += 1;
        t.refresh_rates();
    }

    /// A request resolved. Cache-served responses count toward request and
    /// success totals but not toward latency or bandwidth.
    pub fn record_success(&self, latency: Duration, bytes: usize, from_cache: bool) {
        let mut t = self.totals.lock();
        t.metrics.request_count += 1;
        t.metrics.success_count += 1;
        if !from_cache {
            let ms = latency.as_secs_f64() * 1000.0;
            t.latency_total_ms += ms;
            t.latency_samples += 1;
            t.metrics.total_bytes += bytes as u64;
            if ms > 0.0 && bytes > 0 {
                // bytes/ms == KB/s; x8 for kilobits
                let sample = bytes as f64 * 8.0 / ms;
                t.metrics.bandwidth_kbps = if t.metrics.bandwidth_kbps == 0.0 {
                    sample
                } else {
                    BANDWIDTH_SMOOTHING * sample + (1.0 - BANDWIDTH_SMOOTHING) * t.metrics.bandwidth_kbps
                };
            }
        }
        t.refresh_rates();
    }

    pub fn record_failure(&self, latency: Duration) {
        let mut t = self.totals.lock();
        t.metrics.request_count += 1;
        t.metrics.error_count += 1;
        t.latency_total_ms += latency.as_secs_f64() * 1000.0;
        t.latency_samples += 1;
        t.refresh_rates();
    }

    pub fn record_cancelled(&self) {
        let mut t = self.totals.lock();
        t.metrics.request_count += 1;
        t.metrics.cancelled_count += 1;
    }

    pub fn record_retry(&self) {
        self.totals.lock().metrics.retry_count += 1;
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        self.totals.lock().metrics.clone()
    }

    pub fn reset(&self) {
        *self.totals.lock() = Totals::default();
    }
}
