//! Request orchestration.
//!
//! [`RequestOrchestrator`] is the one call site for performing a request:
//!
//! 1. cache short-circuit (respecting the descriptor's [`CachePolicy`](crate::types::CachePolicy))
//! 2. planning, deduplication and batching through the optimizer
//! 3. the attempt loop: concurrency slot, interceptors, transport call with
//!    the adaptive timeout, exponential backoff on retryable failures and a
//!    single credential refresh on 401
//! 4. cache write, callbacks and metrics
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`transition`] | Pure lifecycle state machine |
//! | [`RetryPolicy`] | Backoff schedule and retry predicate |
//! | [`InterceptorChain`] | Request / response / error hooks |
//! | [`SlotScheduler`] | Priority-ordered concurrency cap |
//! | [`MetricsRecorder`] | Rolling [`PerformanceMetrics`] |
//! | [`HealthReport`] | Aggregate status for external monitoring |

mod dispatch;
mod health;
mod interceptor;
mod manager;
mod metrics;
mod retry;
mod scheduler;
mod state;

pub use dispatch::TransportDispatch;
pub use health::{assess, HealthReport, HealthStatus, MAX_AVERAGE_LATENCY_MS, MIN_SUCCESS_RATE};
pub use interceptor::{AuthRefresher, ErrorAction, HeaderInterceptor, Interceptor, InterceptorChain};
pub use manager::{OrchestratorBuilder, OrchestratorConfig, QueueItem, RequestOrchestrator};
pub use metrics::{MetricsRecorder, PerformanceMetrics};
pub use retry::{RetryCondition, RetryPolicy};
pub use scheduler::{Slot, SlotScheduler};
pub use state::{transition, RequestEvent, RequestState, RequestStatus};
