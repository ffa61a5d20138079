use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::Error;

pub use crate::types::RetryCondition;

/// Exponential backoff: `base_delay * factor^retry`, capped at `max_delay`.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(rename = "base_delay_ms", with = "crate::config::duration_ms")]
    pub base_delay: Duration,
    pub factor: f64,
    #[serde(rename = "max_delay_ms", with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    #[serde(skip)]
    pub condition: Option<RetryCondition>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            condition: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("base_delay", &self.base_delay)
            .field("factor", &self.factor)
            .field("max_delay", &self.max_delay)
            .field("condition", &self.condition.as_ref().map(|_| "custom"))
            .finish()
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Error, u32) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Delay before retry number `retry` (0-based). A server hint
    /// (`Retry-After`) replaces the computed value; both are capped.
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let computed = self
            .base_delay
            .mul_f64(self.factor.max(1.0).powi(retry.min(64) as i32).min(1e9));
        hint.unwrap_or(computed).min(self.max_delay)
    }

    /// Aborts are never retried; otherwise the custom condition decides,
    /// falling back to the error's own classification.
    pub fn should_retry(&self, error: &Error, retries: u32) -> bool {
        self.should_retry_with(None, error, retries)
    }

    /// Like [`should_retry`](Self::should_retry), with a per-request
    /// predicate taking precedence over the policy's own.
    pub fn should_retry_with(&self, overriding: Option<&RetryCondition>, error: &Error, retries: u32) -> bool {
        if error.is_aborted() {
            return false;
        }
        match overriding.or(self.condition.as_ref()) {
            Some(condition) => condition(error, retries),
            None => error.is_retryable(),
        }
    }
}
