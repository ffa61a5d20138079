use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::response::{Progress, Response};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }

    /// Writes that get upgraded under degraded networks.
    pub fn is_write(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(Error::configuration(format!("unknown method: {}", other))),
        }
    }
}

/// Scheduling priority; ordering follows rank (`Low < Normal < High < Critical`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }
}

/// How a request interacts with the response cache.
///
/// | Policy | reads cache | writes cache |
/// |--------|-------------|--------------|
/// | `Default` | yes | yes |
/// | `NoStore` | no | no |
/// | `NoCache` | no | yes |
/// | `Reload` | no | yes |
/// | `ForceCache` | yes | yes |
/// | `OnlyIfCached` | yes, miss is an error | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    #[default]
    Default,
    NoStore,
    NoCache,
    Reload,
    ForceCache,
    OnlyIfCached,
}

impl CachePolicy {
    pub fn reads_cache(&self) -> bool {
        matches!(
            self,
            CachePolicy::Default | CachePolicy::ForceCache | CachePolicy::OnlyIfCached
        )
    }

    pub fn writes_cache(&self) -> bool {
        matches!(
            self,
            CachePolicy::Default | CachePolicy::NoCache | CachePolicy::Reload | CachePolicy::ForceCache
        )
    }

    pub fn network_allowed(&self) -> bool {
        !matches!(self, CachePolicy::OnlyIfCached)
    }
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;
pub type SuccessFn = Arc<dyn Fn(&Response) + Send + Sync>;
pub type ErrorFn = Arc<dyn Fn(&Error) + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>;
/// Retry predicate: `(error, retries so far) -> retry?`.
pub type RetryCondition = Arc<dyn Fn(&Error, u32) -> bool + Send + Sync>;

/// Description of one logical request.
///
/// Treated as immutable once handed to the orchestrator: every attempt works
/// on a fresh clone, so interceptors can rewrite headers without touching the
/// caller's copy.
#[derive(Clone)]
pub struct RequestDescriptor {
    pub id: String,
    pub url: String,
    pub method: Method,
    /// Header names are stored lower-cased; keys are unique.
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Base timeout; scaled by network quality. `None` uses the configured base.
    pub timeout: Option<Duration>,
    /// Retry budget; `None` uses the network-recommended count.
    pub max_retries: Option<u32>,
    /// `None` means "unset", which prioritization treats as `Normal`.
    pub priority: Option<Priority>,
    pub cache_policy: CachePolicy,
    pub cache_ttl: Option<Duration>,
    /// Requests sharing a batch key may be coalesced into one call.
    pub batch_key: Option<String>,
    /// Overrides the orchestrator's retry predicate for this request.
    pub retry_condition: Option<RetryCondition>,
    pub transform_request: Option<TransformFn>,
    pub transform_response: Option<TransformFn>,
    pub on_progress: Option<ProgressFn>,
    pub on_success: Option<SuccessFn>,
    pub on_error: Option<ErrorFn>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            max_retries: None,
            priority: None,
            cache_policy: CachePolicy::Default,
            cache_ttl: None,
            batch_key: None,
            retry_condition: None,
            transform_request: None,
            transform_response: None,
            on_progress: None,
            on_success: None,
            on_error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, url).body(body)
    }

    pub fn put(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, url).body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn batch_key(mut self, key: impl Into<String>) -> Self {
        self.batch_key = Some(key.into());
        self
    }

    pub fn retry_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(f));
        self
    }

    pub fn transform_request<F>(mut self, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.transform_request = Some(Arc::new(f));
        self
    }

    pub fn transform_response<F>(mut self, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.transform_response = Some(Arc::new(f));
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Priority with "unset" resolved to `Normal`.
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }

    /// Copy of this descriptor under a fresh id, for manual retries.
    pub fn renewed(&self) -> Self {
        let mut next = self.clone();
        next.id = uuid::Uuid::new_v4().to_string();
        next
    }

    /// Serialized body length in bytes.
    pub fn body_size(&self) -> usize {
        self.body
            .as_ref()
            .and_then(|b| serde_json::to_vec(b).ok())
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("priority", &self.priority)
            .field("cache_policy", &self.cache_policy)
            .field("batch_key", &self.batch_key)
            .finish_non_exhaustive()
    }
}
