//! Shared builders for integration tests

use std::sync::Arc;
use std::time::Duration;

use adaptive_request::network::{ConnectionSignals, EffectiveType, NetworkMonitor};
use adaptive_request::orchestrator::{OrchestratorConfig, RequestOrchestrator, RetryPolicy};
use adaptive_request::transport::ScriptedTransport;

/// Signals that classify as `good`: fully reliable, but 6 Mbit/s at 200ms.
pub fn good_signals() -> ConnectionSignals {
    ConnectionSignals {
        online: true,
        effective_type: EffectiveType::FourG,
        downlink_mbps: 6.0,
        rtt_ms: 200.0,
        save_data: false,
    }
}

/// Config with short backoff so paused-clock tests stay readable.
pub fn fast_retry_config() -> OrchestratorConfig {
    OrchestratorConfig::default().with_retry(
        RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_factor(2.0),
    )
}

pub fn orchestrator(transport: Arc<ScriptedTransport>) -> Arc<RequestOrchestrator> {
    RequestOrchestrator::builder()
        .transport(transport)
        .config(fast_retry_config())
        .build()
        .expect("orchestrator builds")
}

pub fn orchestrator_on(
    transport: Arc<ScriptedTransport>,
    monitor: Arc<NetworkMonitor>,
) -> Arc<RequestOrchestrator> {
    RequestOrchestrator::builder()
        .transport(transport)
        .monitor(monitor)
        .config(fast_retry_config())
        .build()
        .expect("orchestrator builds")
}
