//! Credential injection and the 401 refresh cycle.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::orchestrator::{AuthRefresher, Interceptor};
use crate::types::RequestDescriptor;
use crate::{Error, Result};

/// Source of the current access token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token; `None` sends the request unauthenticated.
    async fn token(&self) -> Result<Option<String>>;

    /// Obtain a fresh token after the server rejected the current one.
    async fn refresh(&self) -> Result<()>;
}

type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Token held in memory, optionally renewable through a callback.
#[derive(Default)]
pub struct SharedToken {
    token: RwLock<Option<String>>,
    refresh: Option<RefreshFn>,
}

impl SharedToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            refresh: None,
        }
    }

    pub fn with_refresh<F>(mut self, refresh: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<String>> + Send + Sync + 'static,
    {
        self.refresh = Some(Arc::new(refresh));
        self
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }

    pub fn current(&self) -> Option<String> {
        self.token.read().clone()
    }
}

#[async_trait]
impl TokenProvider for SharedToken {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.current())
    }

    async fn refresh(&self) -> Result<()> {
        let Some(refresh) = &self.refresh else {
            return Err(Error::configuration("token has no refresh callback"));
        };
        let fresh = refresh().await?;
        self.set(fresh);
        Ok(())
    }
}

/// Sets `authorization: <scheme> <token>` on every attempt.
pub struct AuthInterceptor {
    provider: Arc<dyn TokenProvider>,
    header: String,
    scheme: Option<String>,
}

impl AuthInterceptor {
    pub fn bearer(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            header: "authorization".to_string(),
            scheme: Some("Bearer".to_string()),
        }
    }

    /// Raw token under a custom header, e.g. `x-api-key`.
    pub fn header(provider: Arc<dyn TokenProvider>, header: impl Into<String>) -> Self {
        Self {
            provider,
            header: header.into().to_ascii_lowercase(),
            scheme: None,
        }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &str {
        "auth"
    }

    async fn on_request(&self, request: &mut RequestDescriptor) -> Result<()> {
        if let Some(token) = self.provider.token().await? {
            let value = match &self.scheme {
                Some(scheme) => format!("{} {}", scheme, token),
                None => token,
            };
            request.headers.insert(self.header.clone(), value);
        }
        Ok(())
    }
}

/// Bridges a [`TokenProvider`] to the orchestrator's refresh hook.
pub struct TokenRefresher {
    provider: Arc<dyn TokenProvider>,
}

impl TokenRefresher {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AuthRefresher for TokenRefresher {
    async fn refresh(&self) -> Result<()> {
        debug!("refreshing credentials");
        self.provider.refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn bearer_header_follows_current_token() {
        let token = Arc::new(SharedToken::new("t1"));
        let ic = AuthInterceptor::bearer(token.clone());
        let mut req = RequestDescriptor::get("/me");
        ic.on_request(&mut req).await.unwrap();
        assert_eq!(req.headers["authorization"], "Bearer t1");

        token.clear();
        let mut req = RequestDescriptor::get("/me");
        ic.on_request(&mut req).await.unwrap();
        assert!(!req.headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn refresh_replaces_token() {
        let token = SharedToken::new("old").with_refresh(|| async { Ok("new".to_string()) }.boxed());
        token.refresh().await.unwrap();
        assert_eq!(token.current().as_deref(), Some("new"));

        let plain = SharedToken::new("x");
        assert!(plain.refresh().await.is_err());
    }
}
