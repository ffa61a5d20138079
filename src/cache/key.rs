//! Cache key generation.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{Method, RequestDescriptor};

pub type KeyFn = Arc<dyn Fn(&RequestDescriptor) -> String + Send + Sync>;

/// Canonical request signature: `METHOD url`, plus a digest of the sorted
/// headers and serialized body when either is present.
pub fn canonical_signature(
    method: Method,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: Option<&serde_json::Value>,
) -> String {
    let mut signature = format!("{} {}", method.as_str(), url);
    if headers.is_empty() && body.is_none() {
        return signature;
    }
    let mut hasher = Sha256::new();
    for (name, value) in headers {
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"\n");
    if let Some(body) = body {
        hasher.update(serde_json::to_string(body).unwrap_or_default().as_bytes());
    }
    let digest: String = hasher
        .finalize()
        .iter()
        .take(12)
        .map(|b| format!("{:02x}", b))
        .collect();
    signature.push('#');
    signature.push_str(&digest);
    signature
}

/// Produces cache keys (and in-flight identities) for descriptors.
///
/// A custom key function replaces the canonical signature when requests are
/// semantically equal beyond literal parameter equality.
#[derive(Clone, Default)]
pub struct CacheKeyGenerator {
    custom: Option<KeyFn>,
    prefix: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> String + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(f));
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn generate(&self, descriptor: &RequestDescriptor) -> String {
        let key = match &self.custom {
            Some(f) => f(descriptor),
            None => canonical_signature(
                descriptor.method,
                &descriptor.url,
                &descriptor.headers,
                descriptor.body.as_ref(),
            ),
        };
        match &self.prefix {
            Some(p) => format!("{}:{}", p, key),
            None => key,
        }
    }
}

impl std::fmt::Debug for CacheKeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheKeyGenerator")
            .field("custom", &self.custom.is_some())
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_get_key_is_readable() {
        let d = RequestDescriptor::get("https://api.test/items");
        assert_eq!(CacheKeyGenerator::new().generate(&d), "GET https://api.test/items");
    }

    #[test]
    fn header_order_does_not_matter() {
        let a = RequestDescriptor::get("https://api.test/x")
            .header("A", "1")
            .header("B", "2");
        let b = RequestDescriptor::get("https://api.test/x")
            .header("b", "2")
            .header("a", "1");
        let gen = CacheKeyGenerator::new();
        assert_eq!(gen.generate(&a), gen.generate(&b));
    }

    #[test]
    fn body_changes_key() {
        let gen = CacheKeyGenerator::new();
        let a = RequestDescriptor::post("https://api.test/ask", json!({"question": "hi"}));
        let b = RequestDescriptor::post("https://api.test/ask", json!({"question": "bye"}));
        assert_ne!(gen.generate(&a), gen.generate(&b));
        assert!(gen.generate(&a).starts_with("POST https://api.test/ask#"));
    }

    #[test]
    fn id_is_not_part_of_key() {
        let gen = CacheKeyGenerator::new();
        let a = RequestDescriptor::get("https://api.test/x").id("one");
        let b = RequestDescriptor::get("https://api.test/x").id("two");
        assert_eq!(gen.generate(&a), gen.generate(&b));
    }

    #[test]
    fn custom_key_fn_and_prefix() {
        let gen = CacheKeyGenerator::new()
            .with_key_fn(|d| d.url.split('?').next().unwrap_or_default().to_string())
            .with_prefix("v1");
        let d = RequestDescriptor::get("https://api.test/x?ts=123");
        assert_eq!(gen.generate(&d), "v1:https://api.test/x");
    }
}
