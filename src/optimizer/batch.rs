//! Batch groups: requests sharing a batch key are coalesced into one call.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::types::{Method, RequestDescriptor, Response};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Batching needs server support for the combined endpoint, so it is off
    /// unless a deployment turns it on.
    pub enabled: bool,
    pub max_batch_size: usize,
    #[serde(rename = "max_wait_ms", with = "crate::config::duration_ms")]
    pub max_wait: Duration,
    /// Target of the combined call.
    pub endpoint: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 10,
            max_wait: Duration::from_millis(50),
            endpoint: "/batch".to_string(),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// One sub-request in the combined wire body `{"requests": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl From<&RequestDescriptor> for SubRequest {
    fn from(d: &RequestDescriptor) -> Self {
        let body = match (&d.body, &d.transform_request) {
            (Some(body), Some(transform)) => Some(transform(body.clone())),
            (body, _) => body.clone(),
        };
        Self {
            method: d.method,
            url: d.url.clone(),
            headers: d.headers.clone(),
            body,
        }
    }
}

/// Wire body for a combined call.
pub fn batch_body(items: &[RequestDescriptor]) -> serde_json::Value {
    let requests: Vec<SubRequest> = items.iter().map(SubRequest::from).collect();
    serde_json::json!({ "requests": requests })
}

/// Split a combined response into per-item results, positionally.
///
/// Elements shaped like `{"status": <u16>, "body": ...}` are treated as
/// sub-responses; a non-2xx sub-response fails only its own item. Any other
/// element is a 200 body.
pub fn split_batch_response(body: &serde_json::Value, expected: usize) -> Vec<Result<Response>> {
    let items = match body {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("responses") {
            Some(serde_json::Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    (0..expected)
        .map(|i| match items.get(i) {
            Some(item) => sub_response(item),
            None => Err(Error::batch(format!(
                "batch response has no entry for item {} of {}",
                i, expected
            ))),
        })
        .collect()
}

fn sub_response(item: &serde_json::Value) -> Result<Response> {
    let status = item
        .get("status")
        .and_then(|s| s.as_u64())
        .and_then(|s| u16::try_from(s).ok());
    match (status, item.get("body")) {
        (Some(status), Some(body)) => {
            let resp = Response::new(status, body.clone());
            if resp.is_success() {
                Ok(resp)
            } else if status == 401 || status == 403 {
                Err(Error::auth(status, body.to_string()))
            } else {
                Err(Error::http(status, body.to_string()))
            }
        }
        _ => Ok(Response::ok(item.clone())),
    }
}

/// Executes flushed groups.
#[async_trait]
pub trait BatchDispatch: Send + Sync {
    /// A group that flushed with a single member runs as a normal request.
    async fn dispatch_one(&self, item: RequestDescriptor) -> Result<Response>;

    /// One combined call; the result vector must be positionally aligned with `items`.
    async fn dispatch_many(&self, batch_key: &str, items: Vec<RequestDescriptor>)
        -> Vec<Result<Response>>;
}

struct Pending {
    descriptor: RequestDescriptor,
    reply: oneshot::Sender<Result<Response>>,
}

struct Group {
    generation: u64,
    items: Vec<Pending>,
}

/// Pending batch groups keyed by batch key.
///
/// A group flushes when it reaches `max_batch_size` or when its max-wait
/// timer fires, whichever comes first. The timer carries the generation of
/// the group it was started for, so a timer outliving a size-triggered flush
/// never touches the next group.
pub struct BatchQueue {
    config: BatchConfig,
    groups: Mutex<HashMap<String, Group>>,
    generation: AtomicU64,
    dispatcher: Arc<dyn BatchDispatch>,
}

impl BatchQueue {
    pub fn new(config: BatchConfig, dispatcher: Arc<dyn BatchDispatch>) -> Arc<Self> {
        Arc::new(Self {
            config,
            groups: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            dispatcher,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Queue `descriptor` under `batch_key`; the receiver yields its own result.
    pub fn submit(
        self: &Arc<Self>,
        batch_key: &str,
        descriptor: RequestDescriptor,
    ) -> oneshot::Receiver<Result<Response>> {
        let (reply, rx) = oneshot::channel();
        let mut timer = None;
        let full = {
            let mut groups = self.groups.lock();
            let group = groups.entry(batch_key.to_string()).or_insert_with(|| {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                timer = Some(generation);
                Group {
                    generation,
                    items: Vec::new(),
                }
            });
            group.items.push(Pending { descriptor, reply });
            if group.items.len() >= self.config.max_batch_size.max(1) {
                groups.remove(batch_key)
            } else {
                None
            }
        };

        match full {
            Some(group) => self.spawn_dispatch(batch_key.to_string(), group.items, "size"),
            None => {
                if let Some(generation) = timer {
                    let queue = Arc::clone(self);
                    let key = batch_key.to_string();
                    let wait = self.config.max_wait;
                    tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        queue.flush_generation(&key, generation);
                    });
                }
            }
        }
        rx
    }

    fn flush_generation(&self, batch_key: &str, generation: u64) {
        let group = {
            let mut groups = self.groups.lock();
            match groups.get(batch_key) {
                Some(g) if g.generation == generation => groups.remove(batch_key),
                _ => None,
            }
        };
        if let Some(group) = group {
            self.spawn_dispatch(batch_key.to_string(), group.items, "timer");
        }
    }

    /// Flush a group now, regardless of size or timer.
    pub fn flush(&self, batch_key: &str) -> bool {
        let group = self.groups.lock().remove(batch_key);
        match group {
            Some(group) => {
                self.spawn_dispatch(batch_key.to_string(), group.items, "manual");
                true
            }
            None => false,
        }
    }

    pub fn pending(&self, batch_key: &str) -> usize {
        self.groups
            .lock()
            .get(batch_key)
            .map(|g| g.items.len())
            .unwrap_or(0)
    }

    fn spawn_dispatch(&self, batch_key: String, mut items: Vec<Pending>, trigger: &'static str) {
        let dispatcher = Arc::clone(&self.dispatcher);
        debug!(batch_key = %batch_key, size = items.len(), trigger, "flushing batch group");
        tokio::spawn(async move {
            if items.len() == 1 {
                if let Some(only) = items.pop() {
                    let result = dispatcher.dispatch_one(only.descriptor).await;
                    let _ = only.reply.send(result);
                }
                return;
            }
            let (descriptors, replies): (Vec<_>, Vec<_>) =
                items.into_iter().map(|p| (p.descriptor, p.reply)).unzip();
            let expected = replies.len();
            let mut results = dispatcher.dispatch_many(&batch_key, descriptors).await;
            while results.len() < expected {
                results.push(Err(Error::batch(format!(
                    "no result for item {} of batch {}",
                    results.len(),
                    batch_key
                ))));
            }
            for (reply, result) in replies.into_iter().zip(results) {
                let _ = reply.send(result);
            }
        });
    }
}
