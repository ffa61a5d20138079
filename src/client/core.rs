use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::builder::ClientBuilder;
use super::query::{QueryHandle, QueryOptions};
use super::signals::{InflightSnapshot, SignalsSnapshot};
use crate::cache::CacheManager;
use crate::clock::SharedClock;
use crate::network::{HttpProbe, NetworkMonitor};
use crate::orchestrator::{HealthReport, PerformanceMetrics, RequestOrchestrator};
use crate::resilience::RateLimiter;
use crate::transport::OutgoingRequest;
use crate::types::{RequestDescriptor, Response};
use crate::{BoxStream, Error, Result};

/// Application-facing client.
///
/// Adds base-URL resolution and client-side rate limiting on top of the
/// [`RequestOrchestrator`]; cheap to clone.
#[derive(Clone)]
pub struct Client {
    orchestrator: Arc<RequestOrchestrator>,
    base_url: Option<Url>,
    rate_limiter: Option<Arc<RateLimiter>>,
    clock: SharedClock,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_parts(
        orchestrator: Arc<RequestOrchestrator>,
        base_url: Option<Url>,
        rate_limiter: Option<Arc<RateLimiter>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            orchestrator,
            base_url,
            rate_limiter,
            clock,
        }
    }

    pub fn orchestrator(&self) -> &Arc<RequestOrchestrator> {
        &self.orchestrator
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        self.orchestrator.monitor()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        self.orchestrator.cache()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Absolute URLs pass through; anything else is joined onto the base URL.
    pub fn resolve_url(&self, url: &str) -> Result<String> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(base.join(url)?.to_string()),
            None => Err(Error::configuration(format!(
                "relative url {} without a base url",
                url
            ))),
        }
    }

    /// Rate-limit key: host and path, without query.
    fn endpoint_key(url: &str) -> String {
        match Url::parse(url) {
            Ok(u) => format!("{}{}", u.host_str().unwrap_or_default(), u.path()),
            Err(_) => url.to_string(),
        }
    }

    fn admit(&self, mut descriptor: RequestDescriptor) -> Result<RequestDescriptor> {
        descriptor.url = self.resolve_url(&descriptor.url)?;
        if let Some(limiter) = &self.rate_limiter {
            limiter.check(&Self::endpoint_key(&descriptor.url))?;
        }
        Ok(descriptor)
    }

    /// Perform a request through the orchestrator.
    ///
    /// A rate-limited call fails with [`Error::RateLimited`] before touching
    /// the cache or the network.
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Response> {
        let descriptor = self.admit(descriptor)?;
        self.orchestrator.request(descriptor).await
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(RequestDescriptor::get(url)).await
    }

    pub async fn post(&self, url: &str, body: serde_json::Value) -> Result<Response> {
        self.request(RequestDescriptor::post(url, body)).await
    }

    pub async fn put(&self, url: &str, body: serde_json::Value) -> Result<Response> {
        self.request(RequestDescriptor::put(url, body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.request(RequestDescriptor::delete(url)).await
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.orchestrator.cancel(id)
    }

    /// Streaming download. Bypasses cache, dedup and retries.
    pub async fn stream(&self, descriptor: RequestDescriptor) -> Result<BoxStream<'static, Bytes>> {
        let descriptor = self.admit(descriptor)?;
        let timeout = self.orchestrator.timeout_for(&descriptor);
        let prepared = self.orchestrator.prepare(&descriptor).await?;
        debug!(request_id = %prepared.id, url = %prepared.url, "opening stream");
        self.orchestrator
            .transport()
            .open_stream(OutgoingRequest::from_descriptor(&prepared, timeout, false))
            .await
    }

    /// Chunked upload of a raw payload, reporting progress through the
    /// descriptor's progress callback.
    pub async fn upload(&self, descriptor: RequestDescriptor, payload: Bytes) -> Result<Response> {
        let descriptor = self.admit(descriptor)?;
        let timeout = self.orchestrator.timeout_for(&descriptor);
        let prepared = self.orchestrator.prepare(&descriptor).await?;
        debug!(request_id = %prepared.id, url = %prepared.url, bytes = payload.len(), "uploading");
        let request = OutgoingRequest::new(prepared.method, &prepared.url, timeout);
        let request = OutgoingRequest {
            id: prepared.id.clone(),
            headers: prepared.headers.clone(),
            ..request
        };
        self.orchestrator
            .transport()
            .upload(request, payload, prepared.on_progress.clone())
            .await
    }

    /// Query handle implementing the UI state-hook contract.
    pub fn query(&self, descriptor: RequestDescriptor, options: QueryOptions) -> Result<QueryHandle> {
        let mut descriptor = descriptor;
        descriptor.url = self.resolve_url(&descriptor.url)?;
        Ok(QueryHandle::new(self.clone(), descriptor, options))
    }

    #[cfg(feature = "socket")]
    pub fn socket(&self, url: &str) -> Result<super::socket::SocketChannel> {
        let url = self.resolve_url(url)?;
        Ok(super::socket::SocketChannel::connect(
            url,
            self.monitor().clone(),
            super::socket::SocketConfig::default(),
        ))
    }

    pub fn health(&self) -> HealthReport {
        self.orchestrator.health()
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.orchestrator.metrics()
    }

    pub fn signals(&self) -> SignalsSnapshot {
        let scheduler = self.orchestrator.scheduler();
        let info = self.monitor().current_info();
        SignalsSnapshot {
            inflight: InflightSnapshot {
                max: scheduler.max(),
                running: scheduler.running(),
                waiting: scheduler.waiting(),
                deduplicated: self.orchestrator.optimizer().inflight().len(),
            },
            online: info.online,
            quality: info.quality,
            cached_items: self.cache().len(),
        }
    }

    /// Start the cache sweeper, the prefetch loop and, when a probe URL is
    /// configured, the latency probe. Tasks stop when the handles are
    /// aborted or the components are dropped.
    pub fn spawn_background(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = vec![
            self.cache().spawn_sweeper(),
            self.orchestrator.spawn_prefetch_loop(),
        ];
        if let Some(url) = self.monitor().config().probe_url.clone() {
            let probe = Arc::new(HttpProbe::new(self.resolve_url(&url)?)?);
            handles.push(self.monitor().spawn_probe_loop(probe));
        }
        Ok(handles)
    }
}
