//! Per-request lifecycle.
//!
//! ```text
//! created --cache hit--> completed
//! created --miss--> queued --slot--> running --ok--> completed
//!                     ^                 |
//!                     |              failure
//!                     |           /          \
//!                  backoff <-- retrying     failed
//! any non-terminal --cancel--> cancelled
//! ```
//!
//! [`transition`] is a pure function from (state, event) to the next state;
//! the orchestrator rejects events the current state does not accept.

use serde::Serialize;
use std::time::Duration;

use crate::{Error, Result};

/// Coarse status as seen by queue consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Queued { attempt: u32 },
    Running { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Completed { from_cache: bool },
    Failed { attempts: u32 },
    Cancelled,
}

impl RequestState {
    pub fn status(&self) -> RequestStatus {
        match self {
            RequestState::Created | RequestState::Queued { .. } | RequestState::Retrying { .. } => {
                RequestStatus::Pending
            }
            RequestState::Running { .. } => RequestStatus::Running,
            RequestState::Completed { .. } => RequestStatus::Completed,
            RequestState::Failed { .. } => RequestStatus::Failed,
            RequestState::Cancelled => RequestStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed { .. } | RequestState::Failed { .. } | RequestState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    CacheHit,
    CacheMiss,
    SlotAcquired,
    Succeeded,
    /// `retry_after` is `Some` when the failure will be retried.
    Failed { retry_after: Option<Duration> },
    BackoffElapsed,
    Cancel,
}

pub fn transition(state: &RequestState, event: &RequestEvent) -> Result<RequestState> {
    use RequestEvent as E;
    use RequestState as S;

    let next = match (state, event) {
        (s, E::Cancel) if !s.is_terminal() => S::Cancelled,
        (S::Created, E::CacheHit) => S::Completed { from_cache: true },
        (S::Created, E::CacheMiss) => S::Queued { attempt: 0 },
        (S::Queued { attempt }, E::SlotAcquired) => S::Running { attempt: *attempt },
        // a queued request can be settled by an identical call already in flight
        (S::Queued { .. } | S::Running { .. }, E::Succeeded) => S::Completed { from_cache: false },
        (S::Running { attempt }, E::Failed { retry_after: Some(delay) }) => S::Retrying {
            attempt: *attempt,
            delay: *delay,
        },
        (S::Queued { attempt } | S::Running { attempt }, E::Failed { retry_after: None }) => S::Failed {
            attempts: attempt + 1,
        },
        (S::Retrying { attempt, .. }, E::BackoffElapsed) => S::Queued {
            attempt: attempt + 1,
        },
        (state, event) => {
            return Err(Error::runtime(format!(
                "invalid request transition: {:?} on {:?}",
                state, event
            )))
        }
    };
    Ok(next)
}
