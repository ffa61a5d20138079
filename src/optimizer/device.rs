use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    #[default]
    Normal,
    Moderate,
    High,
}

/// Device resource snapshot used by prioritization and prefetch gating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Remaining charge in `[0, 1]`; `None` when the platform doesn't report it.
    pub battery_level: Option<f64>,
    pub charging: bool,
    pub memory_pressure: MemoryPressure,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            battery_level: None,
            charging: false,
            memory_pressure: MemoryPressure::Normal,
        }
    }
}

impl DeviceStatus {
    /// Battery below `threshold` and not charging.
    pub fn is_battery_low(&self, threshold: f64) -> bool {
        !self.charging && self.battery_level.is_some_and(|level| level < threshold)
    }

    pub fn is_memory_constrained(&self) -> bool {
        self.memory_pressure == MemoryPressure::High
    }
}

/// Source of device signals. Read fresh on every decision.
pub trait DeviceSignals: Send + Sync {
    fn status(&self) -> DeviceStatus;
}

/// Host-fed device signals: the embedding platform pushes updates.
#[derive(Debug, Default)]
pub struct StaticDevice {
    status: RwLock<DeviceStatus>,
}

impl StaticDevice {
    pub fn new(status: DeviceStatus) -> Self {
        Self {
            status: RwLock::new(status),
        }
    }

    pub fn set(&self, status: DeviceStatus) {
        *self.status.write() = status;
    }

    pub fn set_battery(&self, level: f64, charging: bool) {
        let mut st = self.status.write();
        st.battery_level = Some(level.clamp(0.0, 1.0));
        st.charging = charging;
    }

    pub fn set_memory_pressure(&self, pressure: MemoryPressure) {
        self.status.write().memory_pressure = pressure;
    }
}

impl DeviceSignals for StaticDevice {
    fn status(&self) -> DeviceStatus {
        *self.status.read()
    }
}
