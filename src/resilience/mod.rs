//! Client-side protection against overrunning an endpoint.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RateLimiter`] | Sliding window per endpoint, failing fast with a retry-after |

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
