use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A completed HTTP-shaped response.
///
/// Bodies are kept as JSON values: JSON payloads are parsed, other text is
/// carried as a JSON string and empty bodies as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: serde_json::Value,
    /// Served from the cache without a network round-trip.
    #[serde(default, skip_serializing)]
    pub from_cache: bool,
    /// Served from the cache and older than the configured stale time.
    #[serde(default, skip_serializing)]
    pub stale: bool,
}

impl Response {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
            from_cache: false,
            stale: false,
        }
    }

    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Approximate payload size in bytes (serialized body length).
    pub fn body_size(&self) -> usize {
        match &self.body {
            serde_json::Value::Null => 0,
            serde_json::Value::String(s) => s.len(),
            other => serde_json::to_vec(other).map(|v| v.len()).unwrap_or(0),
        }
    }
}

/// Incremental transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.loaded as f64 / total as f64).min(1.0)),
        }
    }
}
