//! Executes flushed batch groups over a [`Transport`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::interceptor::InterceptorChain;
use super::scheduler::SlotScheduler;
use crate::optimizer::{batch_body, split_batch_response, BatchDispatch};
use crate::transport::{OutgoingRequest, Transport};
use crate::types::{Priority, RequestDescriptor, Response};
use crate::Result;

/// Members arrive with interceptors already applied; the combined call runs
/// the chain once more for itself and takes one concurrency slot.
pub struct TransportDispatch {
    transport: Arc<dyn Transport>,
    endpoint: String,
    default_timeout: Duration,
    interceptors: InterceptorChain,
    scheduler: SlotScheduler,
}

impl TransportDispatch {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        default_timeout: Duration,
        interceptors: InterceptorChain,
        scheduler: SlotScheduler,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            default_timeout,
            interceptors,
            scheduler,
        }
    }

    /// A relative endpoint is resolved against the first member's origin.
    fn endpoint_for(&self, first: Option<&RequestDescriptor>) -> String {
        if let Some(first) = first {
            if let Ok(base) = url::Url::parse(&first.url) {
                if let Ok(joined) = base.join(&self.endpoint) {
                    return joined.to_string();
                }
            }
        }
        self.endpoint.clone()
    }

    async fn send_combined(&self, batch_key: &str, items: &[RequestDescriptor]) -> Result<Response> {
        let timeout = items
            .iter()
            .filter_map(|d| d.timeout)
            .max()
            .unwrap_or(self.default_timeout);
        let priority = items
            .iter()
            .map(RequestDescriptor::effective_priority)
            .max()
            .unwrap_or(Priority::Normal);

        let mut combined = RequestDescriptor::post(self.endpoint_for(items.first()), batch_body(items))
            .header("x-batch-key", batch_key)
            .priority(priority);
        self.interceptors.run_request(&mut combined).await?;
        let request = OutgoingRequest::from_descriptor(&combined, timeout, false);

        let _slot = self.scheduler.acquire(priority).await?;
        debug!(batch_key, size = items.len(), url = %request.url, "sending combined request");
        self.transport.send(request, None).await
    }
}

#[async_trait]
impl BatchDispatch for TransportDispatch {
    async fn dispatch_one(&self, item: RequestDescriptor) -> Result<Response> {
        let timeout = item.timeout.unwrap_or(self.default_timeout);
        let request = OutgoingRequest::from_descriptor(&item, timeout, false);
        let _slot = self.scheduler.acquire(item.effective_priority()).await?;
        self.transport.send(request, item.on_progress.clone()).await
    }

    async fn dispatch_many(&self, batch_key: &str, items: Vec<RequestDescriptor>) -> Vec<Result<Response>> {
        match self.send_combined(batch_key, &items).await {
            Ok(response) => split_batch_response(&response.body, items.len()),
            // the whole call failed; every member sees the same error
            Err(e) => items.iter().map(|_| Err(e.clone())).collect(),
        }
    }
}

impl std::fmt::Debug for TransportDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportDispatch")
            .field("transport", &self.transport.name())
            .field("endpoint", &self.endpoint)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
