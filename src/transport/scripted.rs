use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::{OutgoingRequest, Transport};
use crate::types::{Progress, ProgressFn, Response};
use crate::{BoxStream, Error, Result};

type Responder = Arc<dyn Fn(&OutgoingRequest) -> Result<Response> + Send + Sync>;

/// In-process transport answering from a script.
///
/// Queued outcomes are consumed first; after that the responder (if any)
/// answers, otherwise the call fails with a network error. Every call is
/// recorded, and an optional delay makes timeouts and cancellation
/// observable under a paused tokio clock.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Response>>>,
    responder: Option<Responder>,
    delay: Duration,
    calls: Mutex<Vec<OutgoingRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&OutgoingRequest) -> Result<Response> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn push(&self, outcome: Result<Response>) -> &Self {
        self.script.lock().push_back(outcome);
        self
    }

    pub fn push_ok(&self, body: serde_json::Value) -> &Self {
        self.push(Ok(Response::ok(body)))
    }

    pub fn push_err(&self, error: Error) -> &Self {
        self.push(Err(error))
    }

    pub fn calls(&self) -> Vec<OutgoingRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    async fn answer(&self, request: &OutgoingRequest) -> Result<Response> {
        self.calls.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => match &self.responder {
                Some(responder) => responder(request),
                None => Err(Error::network(format!("no scripted response for {}", request.url))),
            },
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, request: OutgoingRequest, progress: Option<ProgressFn>) -> Result<Response> {
        let resp = self.answer(&request).await?;
        if let Some(cb) = progress {
            let size = resp.body_size() as u64;
            cb(Progress {
                loaded: size,
                total: Some(size),
            });
        }
        Ok(resp)
    }

    async fn open_stream(&self, request: OutgoingRequest) -> Result<BoxStream<'static, Bytes>> {
        let resp = self.answer(&request).await?;
        let bytes = match resp.body {
            serde_json::Value::String(s) => Bytes::from(s),
            other => Bytes::from(serde_json::to_vec(&other)?),
        };
        let chunks: Vec<Result<Bytes>> = bytes
            .chunks(16)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn upload(
        &self,
        request: OutgoingRequest,
        payload: Bytes,
        progress: Option<ProgressFn>,
    ) -> Result<Response> {
        let total = payload.len() as u64;
        if let Some(cb) = &progress {
            let mut sent = 0u64;
            for chunk in payload.chunks(1024) {
                sent += chunk.len() as u64;
                cb(Progress {
                    loaded: sent,
                    total: Some(total),
                });
            }
        }
        self.answer(&request).await
    }
}
