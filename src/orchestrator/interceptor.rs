//! Interceptor hooks around each attempt.
//!
//! Request interceptors may rewrite the attempt's copy of the descriptor
//! (inject headers, rewrite the URL); response interceptors may rewrite the
//! response; error interceptors may reject, which ends retry handling for
//! that attempt.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{RequestDescriptor, Response};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Reject,
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str {
        "interceptor"
    }

    async fn on_request(&self, _request: &mut RequestDescriptor) -> Result<()> {
        Ok(())
    }

    async fn on_response(&self, _request: &RequestDescriptor, _response: &mut Response) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _request: &RequestDescriptor, _error: &Error) -> ErrorAction {
        ErrorAction::Continue
    }
}

/// Runs hooks in registration order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub async fn run_request(&self, request: &mut RequestDescriptor) -> Result<()> {
        for ic in &self.interceptors {
            ic.on_request(request).await?;
        }
        Ok(())
    }

    pub async fn run_response(&self, request: &RequestDescriptor, response: &mut Response) -> Result<()> {
        for ic in &self.interceptors {
            ic.on_response(request, response).await?;
        }
        Ok(())
    }

    /// Every hook sees the error; any rejection wins.
    pub async fn run_error(&self, request: &RequestDescriptor, error: &Error) -> ErrorAction {
        let mut action = ErrorAction::Continue;
        for ic in &self.interceptors {
            if ic.on_error(request, error).await == ErrorAction::Reject {
                tracing::debug!(interceptor = ic.name(), request_id = %request.id, "error rejected by interceptor");
                action = ErrorAction::Reject;
            }
        }
        action
    }
}

/// Adds fixed headers to every request that doesn't already set them.
#[derive(Debug, Clone, Default)]
pub struct HeaderInterceptor {
    headers: BTreeMap<String, String>,
}

impl HeaderInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }
}

#[async_trait]
impl Interceptor for HeaderInterceptor {
    fn name(&self) -> &str {
        "headers"
    }

    async fn on_request(&self, request: &mut RequestDescriptor) -> Result<()> {
        for (name, value) in &self.headers {
            request
                .headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(())
    }
}

/// Renews credentials after a 401; used at most once per request.
#[async_trait]
pub trait AuthRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}
