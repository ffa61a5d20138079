use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Proxy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{decode_body, map_reqwest_error, OutgoingRequest, Transport};
use crate::types::{Progress, ProgressFn, Response};
use crate::{BoxStream, Error, Result};

const UPLOAD_CHUNK: usize = 64 * 1024;
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpTransportConfig {
    pub pool_max_idle_per_host: usize,
    #[serde(rename = "pool_idle_timeout_ms", with = "crate::config::duration_ms")]
    pub pool_idle_timeout: Duration,
    #[serde(rename = "connect_timeout_ms", with = "crate::config::duration_ms")]
    pub connect_timeout: Duration,
    pub proxy_url: Option<String>,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            proxy_url: None,
            user_agent: concat!("adaptive-request/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpTransportConfig {
    /// Defaults with env overrides:
    /// - `ADAPTIVE_HTTP_POOL_MAX_IDLE_PER_HOST`
    /// - `ADAPTIVE_HTTP_POOL_IDLE_TIMEOUT_MS`
    /// - `ADAPTIVE_PROXY_URL`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env::var("ADAPTIVE_HTTP_POOL_MAX_IDLE_PER_HOST")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            cfg.pool_max_idle_per_host = n;
        }
        if let Some(ms) = env::var("ADAPTIVE_HTTP_POOL_IDLE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            cfg.pool_idle_timeout = Duration::from_millis(ms);
        }
        if let Ok(proxy) = env::var("ADAPTIVE_PROXY_URL") {
            cfg.proxy_url = Some(proxy);
        }
        cfg
    }
}

/// Pooled reqwest transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(config.pool_idle_timeout))
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone());

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| Error::configuration(format!("invalid proxy url {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(map_reqwest_error)?;
        Ok(Self { client })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&HttpTransportConfig::from_env())
    }

    fn build(&self, request: &OutgoingRequest) -> Result<reqwest::RequestBuilder> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| Error::configuration(e.to_string()))?;
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .header("x-request-id", &request.id);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body)?;
            builder = builder.header(CONTENT_TYPE, "application/json");
            builder = if request.compress {
                builder.header(CONTENT_ENCODING, "gzip").body(gzip(&bytes)?)
            } else {
                builder.body(bytes)
            };
        }
        Ok(builder)
    }

    fn send_error(&self, e: reqwest::Error, request: &OutgoingRequest) -> Error {
        if e.is_timeout() {
            return Error::Timeout {
                timeout: request.timeout,
                context: request.context().with_source("http_transport"),
            };
        }
        let context = request.context();
        map_reqwest_error(e).map_context(|c| {
            let mut merged = context.with_source("http_transport");
            merged.status = c.status;
            merged
        })
    }

    async fn dispatch(
        &self,
        builder: reqwest::RequestBuilder,
        request: &OutgoingRequest,
    ) -> Result<reqwest::Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| self.send_error(e, request))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(status_error(resp, request).await)
        }
    }

    async fn read_response(
        &self,
        resp: reqwest::Response,
        request: &OutgoingRequest,
        progress: Option<ProgressFn>,
    ) -> Result<Response> {
        let status = resp.status().as_u16();
        let headers = header_map(resp.headers());
        let total = resp.content_length();
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.send_error(e, request))?;
            buf.extend_from_slice(&chunk);
            if let Some(cb) = &progress {
                cb(Progress {
                    loaded: buf.len() as u64,
                    total,
                });
            }
        }
        Ok(Response {
            status,
            headers,
            body: decode_body(&buf),
            from_cache: false,
            stale: false,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, request: OutgoingRequest, progress: Option<ProgressFn>) -> Result<Response> {
        let builder = self.build(&request)?;
        let resp = self.dispatch(builder, &request).await?;
        self.read_response(resp, &request, progress).await
    }

    async fn open_stream(&self, request: OutgoingRequest) -> Result<BoxStream<'static, Bytes>> {
        let builder = self.build(&request)?;
        let resp = self.dispatch(builder, &request).await?;
        let stream = resp.bytes_stream().map_err(map_reqwest_error);
        Ok(Box::pin(stream))
    }

    async fn upload(
        &self,
        request: OutgoingRequest,
        payload: Bytes,
        progress: Option<ProgressFn>,
    ) -> Result<Response> {
        let total = payload.len() as u64;
        let chunks: Vec<Bytes> = (0..payload.len())
            .step_by(UPLOAD_CHUNK)
            .map(|start| payload.slice(start..(start + UPLOAD_CHUNK).min(payload.len())))
            .collect();
        debug!(url = %request.url, bytes = total, chunks = chunks.len(), "streaming upload");

        let mut sent = 0u64;
        let reporter: Option<Arc<dyn Fn(Progress) + Send + Sync>> = progress;
        let body_stream = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(cb) = &reporter {
                cb(Progress {
                    loaded: sent,
                    total: Some(total),
                });
            }
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let mut headers_only = request.clone();
        headers_only.body = None;
        let mut builder = self.build(&headers_only)?;
        if !request.headers.contains_key("content-type") {
            builder = builder.header(CONTENT_TYPE, "application/octet-stream");
        }
        let builder = builder.body(reqwest::Body::wrap_stream(body_stream));
        let resp = self.dispatch(builder, &request).await?;
        self.read_response(resp, &request, None).await
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Only the `Retry-After: <seconds>` form is understood.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    raw.parse::<u64>().ok().map(Duration::from_secs)
}

async fn status_error(resp: reqwest::Response, request: &OutgoingRequest) -> Error {
    let status = resp.status().as_u16();
    let wait = retry_after(resp.headers());
    let mut message = resp.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    let context = request
        .context()
        .with_status(status)
        .with_source("http_transport");
    match status {
        401 => Error::Auth {
            status,
            message,
            context,
        },
        _ => Error::Http {
            status,
            message,
            retry_after: wait,
            context,
        },
    }
}
