use std::time::Duration;
use thiserror::Error;

/// Structured context attached to request-level errors.
///
/// Everything a caller needs to decide what to show the user and whether a
/// manual retry makes sense: where the request went, what came back, and how
/// many automatic retries were already spent on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Target URL of the failed request.
    pub url: Option<String>,
    /// HTTP method of the failed request.
    pub method: Option<String>,
    /// HTTP status, when the server answered.
    pub status: Option<u16>,
    /// Wall-clock time (ms since epoch) at which the error was surfaced.
    pub timestamp_ms: Option<u64>,
    /// Automatic retries performed before the error was surfaced.
    pub retries: u32,
    /// Caller-visible request id.
    pub request_id: Option<String>,
    /// Component that produced the error (e.g. "http_transport", "batch").
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type.
///
/// Request-level variants map onto the transport taxonomy: transient classes
/// (`Network`, `Timeout`, `Http` 5xx/429) are retried locally, the rest are
/// surfaced straight away.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Network error: {message}{}", format_context(.context))]
    Network {
        message: String,
        context: ErrorContext,
    },

    #[error("Request timed out after {}ms{}", .timeout.as_millis(), format_context(.context))]
    Timeout {
        timeout: Duration,
        context: ErrorContext,
    },

    #[error("HTTP {status}: {message}{}", format_context(.context))]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
        context: ErrorContext,
    },

    #[error("Request aborted{}", format_context(.context))]
    Aborted { context: ErrorContext },

    #[error("Rate limit exceeded for {endpoint}, retry after {}ms", .retry_after.as_millis())]
    RateLimited {
        endpoint: String,
        retry_after: Duration,
    },

    #[error("Authentication failed: HTTP {status}: {message}{}", format_context(.context))]
    Auth {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("No cached response for {key}")]
    CacheMiss { key: String },

    #[error("Batch error: {message}{}", format_context(.context))]
    Batch {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref method) = ctx.method {
        parts.push(format!("method: {}", method));
    }
    if let Some(ref url) = ctx.url {
        parts.push(format!("url: {}", url));
    }
    if ctx.retries > 0 {
        parts.push(format!("retries: {}", ctx.retries));
    }
    if let Some(ref id) = ctx.request_id {
        parts.push(format!("request_id: {}", id));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Error::Timeout {
            timeout,
            context: ErrorContext::new(),
        }
    }

    pub fn http(status: u16, msg: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: msg.into(),
            retry_after: None,
            context: ErrorContext::new().with_status(status),
        }
    }

    pub fn aborted() -> Self {
        Error::Aborted {
            context: ErrorContext::new(),
        }
    }

    pub fn auth(status: u16, msg: impl Into<String>) -> Self {
        Error::Auth {
            status,
            message: msg.into(),
            context: ErrorContext::new().with_status(status),
        }
    }

    pub fn batch(msg: impl Into<String>) -> Self {
        Error::Batch {
            message: msg.into(),
            context: ErrorContext::new().with_source("batch"),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    /// Default retry classification.
    ///
    /// Connection failures, timeouts, 5xx and 429 are transient. Other 4xx,
    /// aborts, auth failures and local errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Timeout { .. } => true,
            Error::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            Error::Batch { .. } => true,
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } | Error::Auth { status, .. } => Some(*status),
            _ => self.context().and_then(|c| c.status),
        }
    }

    /// Server- or limiter-provided wait hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Http { retry_after, .. } => *retry_after,
            Error::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Automatic retries spent before this error was surfaced.
    pub fn retries(&self) -> u32 {
        self.context().map(|c| c.retries).unwrap_or(0)
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Network { context, .. }
            | Error::Timeout { context, .. }
            | Error::Http { context, .. }
            | Error::Aborted { context }
            | Error::Auth { context, .. }
            | Error::Batch { context, .. } => Some(context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Error::Network { context, .. }
            | Error::Timeout { context, .. }
            | Error::Http { context, .. }
            | Error::Aborted { context }
            | Error::Auth { context, .. }
            | Error::Batch { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Rewrite the attached context in place (no-op for context-less variants).
    pub fn map_context(mut self, f: impl FnOnce(ErrorContext) -> ErrorContext) -> Self {
        if let Some(ctx) = self.context_mut() {
            let taken = std::mem::take(ctx);
            *ctx = f(taken);
        }
        self
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Configuration(format!("invalid url: {}", e))
    }
}
