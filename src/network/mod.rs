//! Live network-condition tracking.
//!
//! # Network Monitor Module
//!
//! Keeps a best-effort estimate of connectivity and turns it into a quality
//! tier that the rest of the crate uses to scale timeouts, retry budgets and
//! batch sizes.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`NetworkMonitor`] | Holds the current [`NetworkInfo`], notifies subscribers, runs the latency probe |
//! | [`NetworkInfo`] | Snapshot: online flag, bandwidth class, RTT, reliability, quality tier |
//! | [`RecommendedConfig`] | Timeout / retries / batch size / compression lookup per tier |
//! | [`LatencyProbe`] | Cheap round-trip used by the background probe ([`HttpProbe`] over reqwest) |
//!
//! Connectivity events come from the embedding platform through
//! [`NetworkMonitor::update`]; the probe loop only refines RTT and packet loss.

mod info;
mod monitor;
mod probe;

pub use info::{
    classify, reliability, ConnectionSignals, EffectiveType, NetworkInfo, QualityTier,
    RecommendedConfig,
};
pub use monitor::{NetworkMonitor, NetworkMonitorConfig};
pub use probe::{HttpProbe, LatencyProbe};
