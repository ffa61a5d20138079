use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bandwidth class reported by the platform (mirrors the Network Information API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[default]
    #[serde(rename = "4g")]
    FourG,
}

impl EffectiveType {
    /// The two lowest bandwidth classes.
    pub fn is_low_bandwidth(&self) -> bool {
        matches!(self, EffectiveType::Slow2g | EffectiveType::TwoG)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
    Disconnected,
}

impl QualityTier {
    /// Timeout multiplier applied to a base timeout.
    pub fn timeout_multiplier(&self) -> f64 {
        match self {
            QualityTier::Excellent => 1.0,
            QualityTier::Good => 1.5,
            QualityTier::Fair => 2.0,
            QualityTier::Poor | QualityTier::Disconnected => 3.0,
        }
    }

    /// Batch size multiplier applied to a base batch size.
    pub fn batch_multiplier(&self) -> f64 {
        match self {
            QualityTier::Excellent => 1.0,
            QualityTier::Good => 0.8,
            QualityTier::Fair => 0.6,
            QualityTier::Poor | QualityTier::Disconnected => 0.4,
        }
    }

    pub fn is_excellent(&self) -> bool {
        matches!(self, QualityTier::Excellent)
    }

    pub fn is_poor_or_worse(&self) -> bool {
        matches!(self, QualityTier::Poor | QualityTier::Disconnected)
    }
}

/// Raw connectivity inputs pushed by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSignals {
    pub online: bool,
    pub effective_type: EffectiveType,
    /// Estimated downlink in Mbit/s.
    pub downlink_mbps: f64,
    pub rtt_ms: f64,
    pub save_data: bool,
}

impl Default for ConnectionSignals {
    fn default() -> Self {
        Self {
            online: true,
            effective_type: EffectiveType::FourG,
            downlink_mbps: 10.0,
            rtt_ms: 100.0,
            save_data: false,
        }
    }
}

/// Snapshot of the network condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub online: bool,
    pub effective_type: EffectiveType,
    pub downlink_mbps: f64,
    /// Smoothed round-trip time.
    pub rtt_ms: f64,
    pub save_data: bool,
    /// Smoothed probe failure rate in [0, 1].
    pub packet_loss: f64,
    /// Derived reliability score in [0, 1].
    pub reliability: f64,
    pub quality: QualityTier,
    pub updated_at_ms: u64,
}

impl NetworkInfo {
    pub fn derive(signals: &ConnectionSignals, packet_loss: f64, now_ms: u64) -> Self {
        let rel = reliability(signals, packet_loss);
        Self {
            online: signals.online,
            effective_type: signals.effective_type,
            downlink_mbps: signals.downlink_mbps,
            rtt_ms: signals.rtt_ms,
            save_data: signals.save_data,
            packet_loss,
            reliability: rel,
            quality: classify(signals.online, rel, signals.downlink_mbps, signals.rtt_ms),
            updated_at_ms: now_ms,
        }
    }

    pub fn recommended(&self) -> RecommendedConfig {
        RecommendedConfig::for_tier(self.quality)
    }
}

/// Reliability score: 1.0 scaled down by penalty factors, clamped to [0, 1].
///
/// Packet loss observed by the probe scales the score by `1 - loss`.
pub fn reliability(signals: &ConnectionSignals, packet_loss: f64) -> f64 {
    let mut score = 1.0;
    if !signals.online {
        score *= 0.0;
    }
    if signals.rtt_ms > 1000.0 {
        score *= 0.7;
    }
    if signals.downlink_mbps < 1.0 {
        score *= 0.8;
    }
    if signals.effective_type.is_low_bandwidth() {
        score *= 0.6;
    }
    score *= 1.0 - packet_loss.clamp(0.0, 1.0);
    f64::clamp(score, 0.0, 1.0)
}

// (min reliability, min downlink Mbit/s, max rtt ms), strictly descending.
const EXCELLENT: (f64, f64, f64) = (0.9, 10.0, 100.0);
const GOOD: (f64, f64, f64) = (0.75, 5.0, 300.0);
const FAIR: (f64, f64, f64) = (0.5, 1.0, 1000.0);

pub fn classify(online: bool, reliability: f64, downlink_mbps: f64, rtt_ms: f64) -> QualityTier {
    if !online {
        return QualityTier::Disconnected;
    }
    let meets = |(rel, down, rtt): (f64, f64, f64)| {
        reliability >= rel && downlink_mbps >= down && rtt_ms <= rtt
    };
    if meets(EXCELLENT) {
        QualityTier::Excellent
    } else if meets(GOOD) {
        QualityTier::Good
    } else if meets(FAIR) {
        QualityTier::Fair
    } else {
        QualityTier::Poor
    }
}

/// Request parameters recommended for a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecommendedConfig {
    pub timeout: Duration,
    pub retry_count: u32,
    pub batch_size: usize,
    pub use_compression: bool,
}

impl RecommendedConfig {
    pub fn for_tier(tier: QualityTier) -> Self {
        let (timeout_ms, retry_count, batch_size, use_compression) = match tier {
            QualityTier::Excellent => (10_000, 2, 10, false),
            QualityTier::Good => (15_000, 3, 8, false),
            QualityTier::Fair => (20_000, 4, 6, true),
            QualityTier::Poor | QualityTier::Disconnected => (30_000, 5, 4, true),
        };
        Self {
            timeout: Duration::from_millis(timeout_ms),
            retry_count,
            batch_size,
            use_compression,
        }
    }
}
