use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::auth::{AuthInterceptor, TokenProvider, TokenRefresher};
use super::core::Client;
use crate::cache::{CacheKeyGenerator, CacheManager};
use crate::clock::{self, SharedClock};
use crate::config::ClientConfig;
use crate::network::NetworkMonitor;
use crate::optimizer::DeviceSignals;
use crate::orchestrator::{Interceptor, RequestOrchestrator};
use crate::resilience::{RateLimiter, RateLimiterConfig};
use crate::transport::{HttpTransport, Transport};
use crate::types::RetryCondition;
use crate::{Error, Result};

/// Builder for [`Client`].
///
/// Starts from [`ClientConfig::default`]; every component not injected
/// explicitly is built from the config.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    device: Option<Arc<dyn DeviceSignals>>,
    monitor: Option<Arc<NetworkMonitor>>,
    keys: Option<CacheKeyGenerator>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    tokens: Option<Arc<dyn TokenProvider>>,
    retry_condition: Option<RetryCondition>,
    clock: SharedClock,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            device: None,
            monitor: None,
            keys: None,
            interceptors: Vec::new(),
            tokens: None,
            retry_condition: None,
            clock: clock::system(),
        }
    }

    /// Relative request URLs are resolved against this.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    /// Replace the HTTP transport (tests, custom stacks).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn device(mut self, device: Arc<dyn DeviceSignals>) -> Self {
        self.device = Some(device);
        self
    }

    /// Share a monitor with other components instead of creating one.
    pub fn monitor(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.monitor = Some(monitor);
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

    /// Bearer-token injection plus one refresh-and-replay on 401.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(provider);
        self
    }

    pub fn rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.config.rate_limit = Some(RateLimiterConfig::new(max_requests, window));
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.orchestrator.max_concurrent = n.max(1);
        self
    }

    pub fn base_timeout(mut self, timeout: Duration) -> Self {
        self.config.orchestrator.base_timeout = timeout;
        self
    }

    /// Default retry predicate; descriptors can still override it.
    pub fn retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Error, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Client> {
        let mut config = self.config;
        let base_url = config
            .base_url
            .as_deref()
            .map(url::Url::parse)
            .transpose()?;

        let monitor = match self.monitor {
            Some(m) => m,
            None => Arc::new(NetworkMonitor::with_clock(config.network.clone(), self.clock.clone())),
        };
        let cache = Arc::new(CacheManager::with_clock(config.cache.clone(), self.clock.clone()));
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&config.http)?),
        };
        if let Some(condition) = self.retry_condition {
            config.orchestrator.retry.condition = Some(condition);
        }

        let mut orchestrator = RequestOrchestrator::builder()
            .config(config.orchestrator.clone())
            .optimizer_config(config.optimizer.clone())
            .monitor(monitor)
            .cache(cache)
            .transport(transport)
            .clock(self.clock.clone());
        if let Some(device) = self.device {
            orchestrator = orchestrator.device(device);
        }
        if let Some(keys) = self.keys {
            orchestrator = orchestrator.key_generator(keys);
        }
        if let Some(tokens) = &self.tokens {
            orchestrator = orchestrator
                .interceptor(Arc::new(AuthInterceptor::bearer(tokens.clone())))
                .auth_refresher(Arc::new(TokenRefresher::new(tokens.clone())));
        }
        for interceptor in self.interceptors {
            orchestrator = orchestrator.interceptor(interceptor);
        }
        let orchestrator = orchestrator.build()?;

        let rate_limiter = config
            .rate_limit
            .clone()
            .map(|cfg| Arc::new(RateLimiter::with_clock(cfg, self.clock.clone())));

        info!(
            base_url = config.base_url.as_deref().unwrap_or("-"),
            rate_limited = rate_limiter.is_some(),
            "client ready"
        );
        Ok(Client::from_parts(orchestrator, base_url, rate_limiter, self.clock))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
