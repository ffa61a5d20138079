use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

use crate::clock::{self, SharedClock};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterSnapshot {
    pub max_requests: usize,
    pub window: Duration,
    /// Requests counted in the current window.
    pub used: usize,
    /// Wait until the next request would be admitted, if currently full.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimiterConfig {
    /// Requests admitted per endpoint within one window. Zero disables the limit.
    pub max_requests: usize,
    #[serde(rename = "window_ms", with = "crate::config::duration_ms")]
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn with_max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Sliding-window limiter, one window per endpoint.
///
/// A rejected call is not counted; the error carries how long until the
/// oldest counted request leaves the window.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self::with_clock(cfg, clock::system())
    }

    pub fn with_clock(cfg: RateLimiterConfig, clock: SharedClock) -> Self {
        Self {
            cfg,
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn window_ms(&self) -> u64 {
        self.cfg.window.as_millis() as u64
    }

    fn trim(window: &mut VecDeque<u64>, now: u64, window_ms: u64) {
        while window
            .front()
            .is_some_and(|&t| t.saturating_add(window_ms) <= now)
        {
            window.pop_front();
        }
    }

    /// Drop endpoints whose newest request has left the window.
    fn prune_idle(windows: &mut HashMap<String, VecDeque<u64>>, now: u64, window_ms: u64) {
        windows.retain(|_, w| w.back().is_some_and(|&t| t.saturating_add(window_ms) > now));
    }

    /// Count one request against `endpoint`, or fail with `RateLimited`.
    pub fn check(&self, endpoint: &str) -> Result<()> {
        if self.cfg.max_requests == 0 {
            return Ok(());
        }
        let now = self.clock.now_ms();
        let window_ms = self.window_ms();
        let mut windows = self.windows.lock();
        Self::prune_idle(&mut windows, now, window_ms);
        let window = windows.entry(endpoint.to_string()).or_default();
        Self::trim(window, now, window_ms);

        if window.len() >= self.cfg.max_requests {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after =
                Duration::from_millis(oldest.saturating_add(window_ms).saturating_sub(now));
            debug!(endpoint, retry_after_ms = retry_after.as_millis() as u64, "rate limit exceeded");
            return Err(Error::RateLimited {
                endpoint: endpoint.to_string(),
                retry_after,
            });
        }
        window.push_back(now);
        Ok(())
    }

    /// Non-failing form of [`check`](Self::check).
    pub fn try_acquire(&self, endpoint: &str) -> bool {
        self.check(endpoint).is_ok()
    }

    /// Wait until `endpoint` has room, then count the request.
    pub async fn acquire(&self, endpoint: &str) {
        loop {
            match self.check(endpoint) {
                Ok(()) => return,
                Err(e) => {
                    let wait = e.retry_after().unwrap_or(self.cfg.window).max(Duration::from_millis(1));
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    pub fn snapshot(&self, endpoint: &str) -> RateLimiterSnapshot {
        let now = self.clock.now_ms();
        let window_ms = self.window_ms();
        let mut windows = self.windows.lock();
        Self::prune_idle(&mut windows, now, window_ms);
        let used = match windows.get_mut(endpoint) {
            Some(window) => {
                Self::trim(window, now, window_ms);
                window.len()
            }
            None => 0,
        };
        let estimated_wait_ms = if self.cfg.max_requests > 0 && used >= self.cfg.max_requests {
            windows
                .get(endpoint)
                .and_then(|w| w.front())
                .map(|&oldest| oldest.saturating_add(window_ms).saturating_sub(now))
        } else {
            None
        };
        RateLimiterSnapshot {
            max_requests: self.cfg.max_requests,
            window: self.cfg.window,
            used,
            estimated_wait_ms,
        }
    }

    /// Endpoints with requests still inside the window.
    pub fn tracked_endpoints(&self) -> usize {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        Self::prune_idle(&mut windows, now, self.window_ms());
        windows.len()
    }

    /// Forget all windows.
    pub fn reset(&self) {
        self.windows.lock().clear();
    }
}
