//! File and environment configuration.
//!
//! Every section rejects unknown keys. Durations are written as
//! milliseconds (`*_ms`).
//!
//! ```yaml
//! base_url: https://api.example.com
//! orchestrator:
//!   base_timeout_ms: 10000
//!   max_concurrent: 4
//! cache:
//!   max_items: 500
//!   strategy: lfu
//! ```

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::network::NetworkMonitorConfig;
use crate::optimizer::OptimizerConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::resilience::RateLimiterConfig;
use crate::transport::HttpTransportConfig;
use crate::{Error, Result};

/// Serde adapter for `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Relative request URLs are resolved against this.
    pub base_url: Option<String>,
    pub network: NetworkMonitorConfig,
    pub cache: CacheConfig,
    pub optimizer: OptimizerConfig,
    pub orchestrator: OrchestratorConfig,
    pub http: HttpTransportConfig,
    /// Per-endpoint sliding window; absent means no client-side limit.
    pub rate_limit: Option<RateLimiterConfig>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load YAML or JSON, chosen by file extension (YAML otherwise).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::configuration(e.to_string()))
    }

    /// Apply `ADAPTIVE_*` environment overrides.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| env::var(name).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = var("ADAPTIVE_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(ms) = parse_var::<u64>(&var, "ADAPTIVE_TIMEOUT_MS")? {
            self.orchestrator.base_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize>(&var, "ADAPTIVE_MAX_CONCURRENT")? {
            self.orchestrator.max_concurrent = n.max(1);
        }
        if let Some(n) = parse_var::<usize>(&var, "ADAPTIVE_CACHE_MAX_ITEMS")? {
            self.cache.max_items = n;
        }
        if let Some(path) = var("ADAPTIVE_CACHE_PATH") {
            self.cache.persist = true;
            self.cache.path = Some(PathBuf::from(path));
        }
        if let Some(proxy) = var("ADAPTIVE_PROXY_URL") {
            self.http.proxy_url = Some(proxy);
        }
        if let Some(n) = parse_var::<usize>(&var, "ADAPTIVE_HTTP_POOL_MAX_IDLE_PER_HOST")? {
            self.http.pool_max_idle_per_host = n;
        }
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::configuration(format!("{} is not a valid value: {}", name, raw))),
    }
}
