use futures::future::{join_all, FutureExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::TransportDispatch;
use super::health::{assess, HealthReport};
use super::interceptor::{AuthRefresher, ErrorAction, Interceptor, InterceptorChain};
use super::metrics::{MetricsRecorder, PerformanceMetrics};
use super::retry::RetryPolicy;
use super::scheduler::SlotScheduler;
use super::state::{transition, RequestEvent, RequestState, RequestStatus};
use crate::cache::{CacheConfig, CacheKeyGenerator, CacheManager, EntryMetadata};
use crate::clock::{self, SharedClock};
use crate::network::{NetworkMonitor, NetworkMonitorConfig};
use crate::optimizer::{
    BatchQueue, DeviceSignals, ExecutionPlan, OptimizerConfig, RequestOptimizer, StaticDevice,
};
use crate::transport::{HttpTransport, HttpTransportConfig, OutgoingRequest, Transport};
use crate::types::{RequestDescriptor, Response};
use crate::{Error, Result};

/// Finished request records kept around for [`RequestOrchestrator::status`].
const FINISHED_HISTORY: usize = 256;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Timeout before quality scaling, for descriptors that don't set one.
    #[serde(rename = "base_timeout_ms", with = "crate::config::duration_ms")]
    pub base_timeout: Duration,
    /// Cap on simultaneously running network calls.
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    /// Cached results older than this are flagged stale.
    #[serde(rename = "stale_time_ms", with = "crate::config::duration_ms")]
    pub stale_time: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(10),
            max_concurrent: 6,
            retry: RetryPolicy::default(),
            stale_time: Duration::from_secs(5 * 60),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_timeout(mut self, timeout: Duration) -> Self {
        self.base_timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }
}

/// Queue bookkeeping for one request id.
struct Record {
    state: RequestState,
    token: CancellationToken,
    submitted_at_ms: u64,
}

#[derive(Default)]
struct Records {
    live: HashMap<String, Record>,
    finished: VecDeque<String>,
}

/// Queue item as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: String,
    pub state: RequestState,
    pub status: RequestStatus,
    pub submitted_at_ms: u64,
}

/// Single entry point for "perform this request".
///
/// Cache short-circuit, then deduplication, batching and the concurrency
/// cap, then the attempt loop with backoff. Every lifecycle step goes through
/// [`transition`], so [`status`](Self::status) always reflects the state
/// machine.
pub struct RequestOrchestrator {
    config: OrchestratorConfig,
    monitor: Arc<NetworkMonitor>,
    cache: Arc<CacheManager>,
    optimizer: Arc<RequestOptimizer>,
    transport: Arc<dyn Transport>,
    batches: Arc<BatchQueue>,
    scheduler: SlotScheduler,
    interceptors: InterceptorChain,
    refresher: Option<Arc<dyn AuthRefresher>>,
    metrics: MetricsRecorder,
    records: Mutex<Records>,
    clock: SharedClock,
}

impl RequestOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn optimizer(&self) -> &Arc<RequestOptimizer> {
        &self.optimizer
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn scheduler(&self) -> &SlotScheduler {
        &self.scheduler
    }

    pub fn batches(&self) -> &Arc<BatchQueue> {
        &self.batches
    }

    /// Perform a request.
    ///
    /// Callbacks on the descriptor fire once with the final outcome, except
    /// when the request was cancelled.
    pub async fn request(self: &Arc<Self>, descriptor: RequestDescriptor) -> Result<Response> {
        let started = Instant::now();
        let token = self.register(&descriptor.id);
        let outcome = self.resolve(&descriptor, &token).await;
        let elapsed = started.elapsed();
        let cancelled = token.is_cancelled();

        match &outcome {
            Ok(response) => {
                if !response.from_cache {
                    self.advance(&descriptor.id, RequestEvent::Succeeded);
                }
                self.metrics
                    .record_success(elapsed, response.body_size(), response.from_cache);
                if let Some(cb) = &descriptor.on_success {
                    cb(response);
                }
            }
            // an abort is a cancellation whether or not this caller fired it
            Err(e) if cancelled || e.is_aborted() => {
                self.advance(&descriptor.id, RequestEvent::Cancel);
                self.metrics.record_cancelled();
                debug!(request_id = %descriptor.id, "request cancelled");
            }
            Err(e) => {
                self.advance(&descriptor.id, RequestEvent::Failed { retry_after: None });
                self.metrics.record_failure(elapsed);
                if let Some(cb) = &descriptor.on_error {
                    cb(e);
                }
            }
        }
        outcome
    }

    async fn resolve(self: &Arc<Self>, descriptor: &RequestDescriptor, token: &CancellationToken) -> Result<Response> {
        let signature = self.optimizer.signature(descriptor);

        if descriptor.cache_policy.reads_cache() {
            if let Some(entry) = self.cache.get(&signature) {
                self.metrics.record_cache_hit();
                self.advance(&descriptor.id, RequestEvent::CacheHit);
                let age = Duration::from_millis(entry.age_ms(self.cache.now_ms()));
                let mut response = Response::ok(entry.data);
                response.from_cache = true;
                response.stale = age > self.config.stale_time;
                debug!(request_id = %descriptor.id, url = %descriptor.url, stale = response.stale, "served from cache");
                return Ok(response);
            }
            self.metrics.record_cache_miss();
        }
        self.advance(&descriptor.id, RequestEvent::CacheMiss);

        if !descriptor.cache_policy.network_allowed() {
            return Err(Error::CacheMiss { key: signature });
        }

        let plan = self.optimizer.plan(descriptor, self.config.base_timeout);
        debug!(
            request_id = %descriptor.id,
            url = %descriptor.url,
            priority = ?plan.priority,
            timeout_ms = plan.timeout.as_millis() as u64,
            max_retries = plan.max_retries,
            "request planned"
        );

        let joined = {
            let this = Arc::clone(self);
            let leader = descriptor.clone();
            let leader_plan = plan.clone();
            self.optimizer
                .inflight()
                .join_or_start(&plan.signature, move |call_token| {
                    this.run_attempts(leader, leader_plan, call_token).boxed()
                })
        };
        if !joined.is_leader() {
            debug!(request_id = %descriptor.id, "joined identical in-flight request");
        }
        joined.wait(token).await
    }

    /// The attempt loop for one deduplicated call. `token` fires only once
    /// every caller sharing the call has cancelled.
    async fn run_attempts(
        self: Arc<Self>,
        descriptor: RequestDescriptor,
        plan: ExecutionPlan,
        token: CancellationToken,
    ) -> Result<Response> {
        let batched = self.optimizer.batch_key(&descriptor).is_some();
        let mut timeout = plan.timeout;
        let mut retries = 0u32;
        let mut refreshed = false;

        loop {
            // the combined call takes one slot for the whole group
            let slot = if batched {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::aborted()),
                    slot = self.scheduler.acquire(plan.priority) => Some(slot?),
                }
            };
            self.advance(&descriptor.id, RequestEvent::SlotAcquired);

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::aborted()),
                outcome = tokio::time::timeout(timeout, self.attempt(&descriptor, &plan, timeout)) => {
                    outcome.unwrap_or_else(|_| Err(Error::timeout(timeout)))
                }
            };
            drop(slot);

            let error = match outcome {
                Ok(response) => {
                    if descriptor.cache_policy.writes_cache() {
                        self.cache.set(
                            &plan.signature,
                            response.body.clone(),
                            descriptor.cache_ttl,
                            Some(EntryMetadata::with_priority(plan.priority.rank() as i64)),
                        );
                    }
                    debug!(request_id = %descriptor.id, status = response.status, retries, "request succeeded");
                    return Ok(response);
                }
                Err(e) => e,
            };

            if error.status() == Some(401) && !refreshed {
                if let Some(refresher) = &self.refresher {
                    refreshed = true;
                    match refresher.refresh().await {
                        Ok(()) => {
                            info!(request_id = %descriptor.id, "credentials refreshed, replaying request");
                            self.advance(&descriptor.id, RequestEvent::Failed { retry_after: Some(Duration::ZERO) });
                            self.advance(&descriptor.id, RequestEvent::BackoffElapsed);
                            continue;
                        }
                        Err(refresh_error) => {
                            warn!(request_id = %descriptor.id, error = %refresh_error, "credential refresh failed");
                            return Err(self.surface(error, retries, &descriptor));
                        }
                    }
                }
            }

            if self.interceptors.run_error(&descriptor, &error).await == ErrorAction::Reject {
                return Err(self.surface(error, retries, &descriptor));
            }

            let retryable = self.config.retry.should_retry_with(
                descriptor.retry_condition.as_ref(),
                &error,
                retries,
            );
            if retries >= plan.max_retries || !retryable {
                return Err(self.surface(error, retries, &descriptor));
            }

            let delay = self.config.retry.delay_for(retries, error.retry_after());
            self.advance(&descriptor.id, RequestEvent::Failed { retry_after: Some(delay) });
            warn!(
                request_id = %descriptor.id,
                url = %descriptor.url,
                attempt = retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, backing off"
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::aborted()),
                _ = tokio::time::sleep(delay) => {}
            }
            retries += 1;
            self.metrics.record_retry();
            if error.is_timeout() {
                timeout = timeout.mul_f64(1.5);
            }
            self.advance(&descriptor.id, RequestEvent::BackoffElapsed);
        }
    }

    /// One network attempt on a private copy of the descriptor.
    async fn attempt(&self, descriptor: &RequestDescriptor, plan: &ExecutionPlan, timeout: Duration) -> Result<Response> {
        let mut working = descriptor.clone();
        self.interceptors.run_request(&mut working).await?;

        let mut response = match self.optimizer.batch_key(&working).map(str::to_string) {
            Some(key) => {
                working.timeout = Some(timeout);
                self.batches
                    .submit(&key, working.clone())
                    .await
                    .map_err(|_| Error::batch("batch group dropped before replying"))??
            }
            None => {
                let request = OutgoingRequest::from_descriptor(&working, timeout, plan.compress);
                self.transport.send(request, working.on_progress.clone()).await?
            }
        };

        if let Some(transform) = &working.transform_response {
            response.body = transform(std::mem::take(&mut response.body));
        }
        self.interceptors.run_response(&working, &mut response).await?;
        Ok(response)
    }

    /// A private copy of `descriptor` with request interceptors applied, for
    /// calls that bypass the attempt loop (streams, uploads).
    pub async fn prepare(&self, descriptor: &RequestDescriptor) -> Result<RequestDescriptor> {
        let mut working = descriptor.clone();
        self.interceptors.run_request(&mut working).await?;
        Ok(working)
    }

    /// Quality-scaled timeout for a descriptor.
    pub fn timeout_for(&self, descriptor: &RequestDescriptor) -> Duration {
        self.optimizer
            .adaptive_timeout(descriptor.timeout.unwrap_or(self.config.base_timeout))
    }

    fn surface(&self, error: Error, retries: u32, descriptor: &RequestDescriptor) -> Error {
        let now = self.clock.now_ms();
        warn!(request_id = %descriptor.id, url = %descriptor.url, retries, error = %error, "request failed");
        error.map_context(|c| {
            c.with_retries(retries)
                .with_timestamp_ms(now)
                .with_url(&descriptor.url)
                .with_method(descriptor.method.as_str())
                .with_request_id(&descriptor.id)
        })
    }

    fn register(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let record = Record {
            state: RequestState::Created,
            token: token.clone(),
            submitted_at_ms: self.clock.now_ms(),
        };
        let mut records = self.records.lock();
        records.finished.retain(|f| f != id);
        records.live.insert(id.to_string(), record);
        token
    }

    fn advance(&self, id: &str, event: RequestEvent) {
        let mut records = self.records.lock();
        let Some(record) = records.live.get_mut(id) else {
            return;
        };
        match transition(&record.state, &event) {
            Ok(next) => {
                debug!(request_id = id, from = ?record.state, to = ?next, "request transition");
                let terminal = next.is_terminal();
                record.state = next;
                if terminal {
                    records.finished.push_back(id.to_string());
                    while records.finished.len() > FINISHED_HISTORY {
                        if let Some(old) = records.finished.pop_front() {
                            records.live.remove(&old);
                        }
                    }
                }
            }
            Err(e) => debug!(request_id = id, error = %e, "transition ignored"),
        }
    }

    /// Abort a queued, running or backing-off request. Returns `false` when
    /// the id is unknown or already settled.
    pub fn cancel(&self, id: &str) -> bool {
        let token = {
            let records = self.records.lock();
            match records.live.get(id) {
                Some(r) if !r.state.is_terminal() => r.token.clone(),
                _ => return false,
            }
        };
        token.cancel();
        self.advance(id, RequestEvent::Cancel);
        info!(request_id = id, "cancel requested");
        true
    }

    pub fn status(&self, id: &str) -> Option<RequestStatus> {
        self.records.lock().live.get(id).map(|r| r.state.status())
    }

    pub fn queue_item(&self, id: &str) -> Option<QueueItem> {
        self.records.lock().live.get(id).map(|r| QueueItem {
            id: id.to_string(),
            state: r.state.clone(),
            status: r.state.status(),
            submitted_at_ms: r.submitted_at_ms,
        })
    }

    /// Requests that have not settled yet.
    pub fn pending(&self) -> Vec<QueueItem> {
        let records = self.records.lock();
        let mut items: Vec<QueueItem> = records
            .live
            .iter()
            .filter(|(_, r)| !r.state.is_terminal())
            .map(|(id, r)| QueueItem {
                id: id.clone(),
                state: r.state.clone(),
                status: r.state.status(),
                submitted_at_ms: r.submitted_at_ms,
            })
            .collect();
        items.sort_by(|a, b| a.submitted_at_ms.cmp(&b.submitted_at_ms).then_with(|| a.id.cmp(&b.id)));
        items
    }

    /// Replace the cached value for a descriptor without a round-trip.
    pub fn mutate(&self, descriptor: &RequestDescriptor, value: serde_json::Value) {
        let key = self.optimizer.signature(descriptor);
        self.cache.set(&key, value, descriptor.cache_ttl, None);
    }

    /// Cached value for a descriptor, if any.
    pub fn cached(&self, descriptor: &RequestDescriptor) -> Option<serde_json::Value> {
        self.cache.get_value(&self.optimizer.signature(descriptor))
    }

    pub fn invalidate<F>(&self, matcher: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.cache.invalidate_pattern(matcher)
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn health(&self) -> HealthReport {
        let metrics = self.metrics.snapshot();
        let network_info = self.monitor.current_info();
        HealthReport {
            status: assess(&metrics, &network_info),
            metrics,
            network_info,
            cache_metrics: self.cache.metrics(),
        }
    }

    /// Warm the cache for the next slice of queued URLs. Returns how many
    /// were fetched before the cycle budget ran out.
    pub async fn run_prefetch_cycle(self: &Arc<Self>) -> usize {
        let gate = self.optimizer.prefetch_gate();
        if !gate.is_open() {
            debug!(reason = %gate, "prefetch skipped");
            return 0;
        }
        let batch = self.optimizer.next_prefetch_batch();
        if batch.is_empty() {
            return 0;
        }
        let budget = self.optimizer.config().prefetch.cycle_budget;
        let count = batch.len();
        let work = join_all(batch.into_iter().map(|d| self.request(d)));
        match tokio::time::timeout(budget, work).await {
            Ok(results) => {
                let ok = results.iter().filter(|r| r.is_ok()).count();
                debug!(requested = count, fetched = ok, "prefetch cycle done");
                ok
            }
            Err(_) => {
                debug!(requested = count, "prefetch cycle ran out of budget");
                0
            }
        }
    }

    /// Run prefetch cycles on the configured interval until the
    /// orchestrator is dropped.
    pub fn spawn_prefetch_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.optimizer.config().prefetch.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(orchestrator) = weak.upgrade() else {
                    break;
                };
                orchestrator.run_prefetch_cycle().await;
            }
        })
    }
}

/// Builder for [`RequestOrchestrator`]. Components not supplied are created
/// with default configuration.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    optimizer_config: OptimizerConfig,
    monitor: Option<Arc<NetworkMonitor>>,
    cache: Option<Arc<CacheManager>>,
    device: Option<Arc<dyn DeviceSignals>>,
    transport: Option<Arc<dyn Transport>>,
    keys: Option<CacheKeyGenerator>,
    interceptors: InterceptorChain,
    refresher: Option<Arc<dyn AuthRefresher>>,
    clock: SharedClock,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            optimizer_config: OptimizerConfig::default(),
            monitor: None,
            cache: None,
            device: None,
            transport: None,
            keys: None,
            interceptors: InterceptorChain::new(),
            refresher: None,
            clock: clock::system(),
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn optimizer_config(mut self, config: OptimizerConfig) -> Self {
        self.optimizer_config = config;
        self
    }

    pub fn monitor(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn device(mut self, device: Arc<dyn DeviceSignals>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn auth_refresher(mut self, refresher: Arc<dyn AuthRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Clock for cache TTLs and error timestamps of components built here.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Arc<RequestOrchestrator>> {
        let monitor = match self.monitor {
            Some(m) => m,
            None => Arc::new(NetworkMonitor::with_clock(
                NetworkMonitorConfig::default(),
                self.clock.clone(),
            )),
        };
        let cache = match self.cache {
            Some(c) => c,
            None => Arc::new(CacheManager::with_clock(CacheConfig::default(), self.clock.clone())),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&HttpTransportConfig::from_env())?),
        };
        let device = self
            .device
            .unwrap_or_else(|| Arc::new(StaticDevice::default()));

        let batch_config = self.optimizer_config.batch.clone();
        let mut optimizer =
            RequestOptimizer::new(self.optimizer_config, monitor.clone(), cache.clone(), device);
        if let Some(keys) = self.keys {
            optimizer = optimizer.with_key_generator(keys);
        }
        let scheduler = SlotScheduler::new(self.config.max_concurrent);
        let dispatch = TransportDispatch::new(
            transport.clone(),
            batch_config.endpoint.clone(),
            self.config.base_timeout,
            self.interceptors.clone(),
            scheduler.clone(),
        );
        let batches = BatchQueue::new(batch_config, Arc::new(dispatch));

        info!(
            transport = transport.name(),
            max_concurrent = self.config.max_concurrent,
            base_timeout_ms = self.config.base_timeout.as_millis() as u64,
            "request orchestrator ready"
        );

        Ok(Arc::new(RequestOrchestrator {
            scheduler,
            config: self.config,
            monitor,
            cache,
            optimizer: Arc::new(optimizer),
            transport,
            batches,
            interceptors: self.interceptors,
            refresher: self.refresher,
            metrics: MetricsRecorder::new(),
            records: Mutex::new(Records::default()),
            clock: self.clock,
        }))
    }
}
