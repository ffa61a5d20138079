//! The contract consumed by UI state hooks.
//!
//! A [`QueryHandle`] owns one logical query: it performs the request, keeps
//! the latest data/error/loading state, tracks staleness against its own
//! `staleTime`, and issues at most one background refetch at a time when the
//! network comes back or the window regains focus.

use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::core::Client;
use crate::observer::{Publisher, Subscription};
use crate::types::{CachePolicy, RequestDescriptor, Response, RetryCondition};
use crate::{Error, Result};

#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryOptions {
    /// A disabled query never fetches on mount or in the background.
    pub enabled: bool,
    pub refetch_on_mount: bool,
    pub refetch_on_window_focus: bool,
    pub refetch_on_reconnect: bool,
    /// Milliseconds in serialized form.
    #[serde(with = "crate::config::duration_ms")]
    pub stale_time: Duration,
    pub cache_policy: CachePolicy,
    #[serde(skip)]
    pub retry_condition: Option<RetryCondition>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            refetch_on_mount: true,
            refetch_on_window_focus: false,
            refetch_on_reconnect: true,
            stale_time: Duration::from_secs(5 * 60),
            cache_policy: CachePolicy::Default,
            retry_condition: None,
        }
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("enabled", &self.enabled)
            .field("refetch_on_mount", &self.refetch_on_mount)
            .field("refetch_on_window_focus", &self.refetch_on_window_focus)
            .field("refetch_on_reconnect", &self.refetch_on_reconnect)
            .field("stale_time", &self.stale_time)
            .field("cache_policy", &self.cache_policy)
            .finish_non_exhaustive()
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn refetch_on_mount(mut self, on: bool) -> Self {
        self.refetch_on_mount = on;
        self
    }

    pub fn refetch_on_window_focus(mut self, on: bool) -> Self {
        self.refetch_on_window_focus = on;
        self
    }

    pub fn refetch_on_reconnect(mut self, on: bool) -> Self {
        self.refetch_on_reconnect = on;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Error, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }
}

/// What a hook renders.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub data: Option<serde_json::Value>,
    pub error: Option<Error>,
    pub loading: bool,
    pub stale: bool,
    pub from_cache: bool,
    /// When `data` was produced (ms since epoch); cache hits keep the
    /// original fetch time.
    pub updated_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum FetchMode {
    /// Honor the query's cache policy.
    CacheFirst,
    /// Skip the cache read, still write the result back.
    Network,
}

struct QueryInner {
    client: Client,
    descriptor: RequestDescriptor,
    options: QueryOptions,
    key: String,
    state: Mutex<QueryState>,
    current: Mutex<Option<String>>,
    refetching: AtomicBool,
    last_online: AtomicBool,
    publisher: Publisher<QueryState>,
    reconnect: Mutex<Option<Subscription>>,
}

#[derive(Clone)]
pub struct QueryHandle {
    inner: Arc<QueryInner>,
}

impl QueryHandle {
    pub(crate) fn new(client: Client, mut descriptor: RequestDescriptor, options: QueryOptions) -> Self {
        if descriptor.retry_condition.is_none() {
            descriptor.retry_condition = options.retry_condition.clone();
        }
        let key = client.orchestrator().optimizer().signature(&descriptor);
        let online = client.monitor().is_online();
        let inner = Arc::new(QueryInner {
            client,
            descriptor,
            options,
            key,
            state: Mutex::new(QueryState::default()),
            current: Mutex::new(None),
            refetching: AtomicBool::new(false),
            last_online: AtomicBool::new(online),
            publisher: Publisher::new(),
            reconnect: Mutex::new(None),
        });

        if inner.options.refetch_on_reconnect {
            let weak = Arc::downgrade(&inner);
            let subscription = inner.client.monitor().subscribe(move |info| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let was_online = inner.last_online.swap(info.online, Ordering::SeqCst);
                if info.online && !was_online {
                    inner.background_refetch("reconnect");
                }
            });
            *inner.reconnect.lock() = Some(subscription);
        }
        Self { inner }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.inner.options
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.inner.descriptor
    }

    /// Initial load. `None` when the query is disabled. A stale cached
    /// result is returned right away and refreshed in the background.
    pub async fn mount(&self) -> Option<Result<Response>> {
        if !self.inner.options.enabled {
            return None;
        }
        let outcome = self.inner.fetch(FetchMode::CacheFirst).await;
        if self.inner.options.refetch_on_mount {
            if let Ok(resp) = &outcome {
                if resp.from_cache && self.inner.is_stale() {
                    self.inner.background_refetch("mount");
                }
            }
        }
        Some(outcome)
    }

    pub async fn request(&self) -> Result<Response> {
        self.inner.fetch(FetchMode::CacheFirst).await
    }

    /// Run the query again under a fresh request id after a failure.
    pub async fn retry(&self) -> Result<Response> {
        self.inner.update(|s| s.error = None);
        self.inner.fetch(FetchMode::CacheFirst).await
    }

    /// Bypass the cache and fetch from the network.
    pub async fn refetch(&self) -> Result<Response> {
        self.inner.fetch(FetchMode::Network).await
    }

    pub fn cancel(&self) -> bool {
        let current = self.inner.current.lock().clone();
        match current {
            Some(id) => self.inner.client.cancel(&id),
            None => false,
        }
    }

    /// Replace local and cached data without a round-trip.
    pub fn mutate(&self, value: serde_json::Value) {
        self.inner
            .client
            .orchestrator()
            .mutate(&self.inner.descriptor, value.clone());
        let now = self.inner.client.clock().now_ms();
        self.inner.update(|s| {
            s.data = Some(value);
            s.error = None;
            s.from_cache = false;
            s.updated_at_ms = Some(now);
        });
    }

    /// [`mutate`](Self::mutate) with a function of the current data.
    pub fn mutate_with<F>(&self, updater: F)
    where
        F: FnOnce(Option<&serde_json::Value>) -> serde_json::Value,
    {
        let next = {
            let state = self.inner.state.lock();
            updater(state.data.as_ref())
        };
        self.mutate(next);
    }

    /// Window regained focus; returns whether a background refetch started.
    pub fn on_window_focus(&self) -> bool {
        self.inner.options.refetch_on_window_focus && self.inner.background_refetch("focus")
    }

    pub fn is_stale(&self) -> bool {
        self.inner.is_stale()
    }

    pub fn is_refetching(&self) -> bool {
        self.inner.refetching.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> QueryState {
        let mut state = self.inner.state.lock().clone();
        state.stale = self.inner.is_stale();
        state
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&QueryState) + Send + Sync + 'static,
    {
        self.inner.publisher.subscribe(handler)
    }
}

impl QueryInner {
    fn is_stale(&self) -> bool {
        let updated = self.state.lock().updated_at_ms;
        match updated {
            Some(at) => {
                let age = self.client.clock().now_ms().saturating_sub(at);
                age > self.options.stale_time.as_millis() as u64
            }
            None => true,
        }
    }

    fn update<F: FnOnce(&mut QueryState)>(&self, f: F) {
        let snapshot = {
            let mut state = self.state.lock();
            f(&mut state);
            state.clone()
        };
        let mut snapshot = snapshot;
        snapshot.stale = self.is_stale();
        self.publisher.publish(&snapshot);
    }

    async fn fetch(&self, mode: FetchMode) -> Result<Response> {
        let mut descriptor = self.descriptor.renewed();
        descriptor.cache_policy = match (mode, self.options.cache_policy) {
            (FetchMode::CacheFirst, policy) => policy,
            (FetchMode::Network, p @ (CachePolicy::NoStore | CachePolicy::OnlyIfCached)) => p,
            (FetchMode::Network, _) => CachePolicy::Reload,
        };
        *self.current.lock() = Some(descriptor.id.clone());
        self.update(|s| s.loading = true);

        let outcome = self.client.request(descriptor).await;
        let now = self.client.clock().now_ms();
        match &outcome {
            Ok(resp) => {
                let updated_at = if resp.from_cache {
                    let age = self.client.cache().entry_age(&self.key).unwrap_or_default();
                    now.saturating_sub(age.as_millis() as u64)
                } else {
                    now
                };
                self.update(|s| {
                    s.data = Some(resp.body.clone());
                    s.error = None;
                    s.loading = false;
                    s.from_cache = resp.from_cache;
                    s.updated_at_ms = Some(updated_at);
                });
            }
            Err(e) if e.is_aborted() => self.update(|s| s.loading = false),
            Err(e) => self.update(|s| {
                s.error = Some(e.clone());
                s.loading = false;
            }),
        }
        outcome
    }

    /// Starts a refetch unless disabled, fresh, or one is already running.
    fn background_refetch(self: &Arc<Self>, reason: &'static str) -> bool {
        if !self.options.enabled || !self.is_stale() {
            return false;
        }
        if self
            .refetching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.refetching.store(false, Ordering::SeqCst);
            return false;
        };
        debug!(url = %self.descriptor.url, reason, "background refetch");
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let _ = inner.fetch(FetchMode::Network).await;
            inner.refetching.store(false, Ordering::SeqCst);
        });
        true
    }
}
