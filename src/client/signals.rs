use serde::Serialize;

use crate::network::QualityTier;

/// Facts about the client's current load and connectivity, for callers that
/// want to make their own scheduling decisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalsSnapshot {
    pub inflight: InflightSnapshot,
    pub online: bool,
    pub quality: QualityTier,
    pub cached_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InflightSnapshot {
    pub max: usize,
    pub running: usize,
    pub waiting: usize,
    /// Distinct calls shared by deduplicated callers.
    pub deduplicated: usize,
}
