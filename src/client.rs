//! Application-facing client.
//!
//! [`Client`] wraps the [`RequestOrchestrator`](crate::orchestrator::RequestOrchestrator)
//! with base-URL resolution, per-endpoint rate limiting, credential
//! injection, streaming transfers, UI query handles and socket channels.
//! Implementation details live in submodules under `src/client/`.

pub mod auth;
pub mod builder;
pub mod core;
pub mod default;
pub mod query;
pub mod signals;
#[cfg(feature = "socket")]
pub mod socket;

pub use auth::{AuthInterceptor, SharedToken, TokenProvider, TokenRefresher};
pub use builder::ClientBuilder;
pub use self::core::Client;
pub use default::{default_client, install_default, require_default};
pub use query::{QueryHandle, QueryOptions, QueryState};
pub use signals::{InflightSnapshot, SignalsSnapshot};
#[cfg(feature = "socket")]
pub use socket::{SocketChannel, SocketConfig, SocketEvent};
