//! # adaptive-request
//!
//! Adaptive request and cache orchestration for network clients.
//!
//! ## Overview
//!
//! Every request goes through one orchestrator that checks a bounded TTL
//! cache first, shares identical in-flight calls, coalesces batchable
//! requests, schedules by priority under a concurrency cap and retries
//! transient failures with exponential backoff. Timeouts, retry budgets and
//! batch sizes follow the measured network quality, and prefetching backs
//! off when the battery is low, memory is tight or the network is poor.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use adaptive_request::{Client, RequestDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> adaptive_request::Result<()> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com/v1/")
//!         .build()?;
//!
//!     let first = client.get("items").await?;
//!     // served from cache without touching the network
//!     let again = client.request(RequestDescriptor::get("items")).await?;
//!     assert!(again.from_cache);
//!     println!("{}", first.body);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`network`] | Connectivity tracking, quality tiers, latency probe |
//! | [`cache`] | TTL cache with eviction strategies and persistence |
//! | [`optimizer`] | Dedup, batching, prioritization, adaptive timeouts, prefetch |
//! | [`orchestrator`] | The request state machine, retries, concurrency cap, health |
//! | [`transport`] | reqwest transport and an in-process scripted transport |
//! | [`resilience`] | Per-endpoint sliding-window rate limiting |
//! | [`client`] | Application façade: auth, query handles, streams, sockets |
//! | [`config`] | File and environment configuration |

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod network;
pub mod observer;
pub mod optimizer;
pub mod orchestrator;
pub mod resilience;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheManager};
pub use client::{Client, ClientBuilder, QueryHandle, QueryOptions};
pub use config::ClientConfig;
pub use network::{NetworkInfo, NetworkMonitor, QualityTier};
pub use optimizer::RequestOptimizer;
pub use orchestrator::{HealthReport, HealthStatus, RequestOrchestrator};
pub use types::{CachePolicy, Method, Priority, RequestDescriptor, Response};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
