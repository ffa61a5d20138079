use serde::Serialize;
use std::fmt;

use super::metrics::PerformanceMetrics;
use crate::cache::CacheMetrics;
use crate::network::NetworkInfo;

/// Success rate below which the subsystem reports degraded.
pub const MIN_SUCCESS_RATE: f64 = 0.8;
/// Average latency above which the subsystem reports degraded.
pub const MAX_AVERAGE_LATENCY_MS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

/// Aggregate surface for external monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub metrics: PerformanceMetrics,
    pub network_info: NetworkInfo,
    pub cache_metrics: CacheMetrics,
}

/// Offline is unhealthy. Poor quality, a low success rate or slow responses
/// degrade; rates only count once at least one request has completed.
pub fn assess(metrics: &PerformanceMetrics, network: &NetworkInfo) -> HealthStatus {
    if !network.online {
        return HealthStatus::Unhealthy;
    }
    let has_outcomes = metrics.completed() > 0;
    if network.quality.is_poor_or_worse()
        || (has_outcomes && metrics.success_rate < MIN_SUCCESS_RATE)
        || metrics.average_latency_ms > MAX_AVERAGE_LATENCY_MS
    {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}
