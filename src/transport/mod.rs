//! Transport abstraction.
//!
//! The orchestrator only sees [`Transport`]; [`HttpTransport`] is the
//! production implementation over reqwest and [`ScriptedTransport`] an
//! in-process double that answers from a script.

mod http;
mod scripted;

pub use http::{HttpTransport, HttpTransportConfig};
pub use scripted::ScriptedTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::{Method, ProgressFn, RequestDescriptor, Response};
use crate::{BoxStream, Error, ErrorContext, Result};

/// One attempt as handed to a transport, after interceptors and planning.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub id: String,
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
    /// Gzip the body.
    pub compress: bool,
}

impl OutgoingRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout,
            compress: false,
        }
    }

    pub fn from_descriptor(descriptor: &RequestDescriptor, timeout: Duration, compress: bool) -> Self {
        let body = match (&descriptor.body, &descriptor.transform_request) {
            (Some(body), Some(transform)) => Some(transform(body.clone())),
            (body, _) => body.clone(),
        };
        Self {
            id: descriptor.id.clone(),
            method: descriptor.method,
            url: descriptor.url.clone(),
            headers: descriptor.headers.clone(),
            body,
            timeout,
            compress,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn context(&self) -> ErrorContext {
        ErrorContext::new()
            .with_url(&self.url)
            .with_method(self.method.as_str())
            .with_request_id(&self.id)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Perform one round-trip. Non-2xx statuses come back as errors.
    async fn send(&self, request: OutgoingRequest, progress: Option<ProgressFn>) -> Result<Response>;

    /// Open a response body as a byte stream.
    async fn open_stream(&self, request: OutgoingRequest) -> Result<BoxStream<'static, Bytes>> {
        Err(Error::runtime(format!(
            "{} transport does not support streaming ({})",
            self.name(),
            request.url
        )))
    }

    /// Streaming upload of a raw payload, reporting bytes sent.
    async fn upload(
        &self,
        request: OutgoingRequest,
        _payload: Bytes,
        _progress: Option<ProgressFn>,
    ) -> Result<Response> {
        Err(Error::runtime(format!(
            "{} transport does not support uploads ({})",
            self.name(),
            request.url
        )))
    }
}

/// Classify a reqwest failure that carries no request-specific knowledge.
pub(crate) fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_builder() {
        return Error::configuration(e.to_string());
    }
    let mut context = ErrorContext::new().with_source("http_transport");
    if let Some(url) = e.url() {
        context = context.with_url(url.as_str());
    }
    match e.status() {
        Some(status) => Error::Http {
            status: status.as_u16(),
            message: e.to_string(),
            retry_after: None,
            context: context.with_status(status.as_u16()),
        },
        None => Error::Network {
            message: e.to_string(),
            context,
        },
    }
}

/// Response bodies as JSON: parsed when possible, otherwise a string; empty is `null`.
pub(crate) fn decode_body(bytes: &[u8]) -> serde_json::Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
