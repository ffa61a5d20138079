//! In-flight request deduplication.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::types::Response;
use crate::{Error, Result};

pub type SharedResponse = Shared<BoxFuture<'static, Result<Response>>>;

/// Callers waiting on one shared call. The call's token fires only once the
/// last waiter has gone and at least one of them left by cancelling.
struct Waiters {
    token: CancellationToken,
    count: Mutex<WaiterCount>,
}

#[derive(Default)]
struct WaiterCount {
    live: usize,
    detached: bool,
}

impl Waiters {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            count: Mutex::new(WaiterCount::default()),
        })
    }

    fn first(self: &Arc<Self>) -> WaiterGuard {
        self.count.lock().live = 1;
        WaiterGuard {
            waiters: self.clone(),
            detached: false,
        }
    }

    /// Registers a waiter unless the call was already abandoned.
    fn try_join(self: &Arc<Self>) -> Option<WaiterGuard> {
        let mut count = self.count.lock();
        if self.token.is_cancelled() {
            return None;
        }
        count.live += 1;
        Some(WaiterGuard {
            waiters: self.clone(),
            detached: false,
        })
    }
}

struct WaiterGuard {
    waiters: Arc<Waiters>,
    detached: bool,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let mut count = self.waiters.count.lock();
        count.live = count.live.saturating_sub(1);
        count.detached |= self.detached;
        if count.live == 0 && count.detached {
            self.waiters.token.cancel();
        }
    }
}

struct Call {
    shared: SharedResponse,
    waiters: Arc<Waiters>,
}

/// A caller's handle on a shared call.
pub struct Joined {
    leader: bool,
    shared: SharedResponse,
    guard: WaiterGuard,
}

impl Joined {
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Wait for the shared outcome. Firing `cancel` detaches only this
    /// caller; the call itself is aborted once every waiter has detached.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<Response> {
        let Joined { shared, mut guard, .. } = self;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                guard.detached = true;
                Err(Error::aborted())
            }
            outcome = shared => outcome,
        }
    }
}

/// Map of signature -> shared pending result.
///
/// The call is driven by its own task so it settles even if every caller
/// stops waiting without cancelling; its entry is removed the moment it
/// settles, before any waiter observes the result.
#[derive(Clone, Default)]
pub struct InFlightRequests {
    calls: Arc<Mutex<HashMap<String, Call>>>,
}

impl InFlightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the call running for `signature`, or start one with `start`,
    /// which receives the token that aborts the shared call.
    pub fn join_or_start<F>(&self, signature: &str, start: F) -> Joined
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<Response>>,
    {
        let mut calls = self.calls.lock();
        if let Some(existing) = calls.get(signature) {
            // an abandoned call is still unwinding; start over
            if let Some(guard) = existing.waiters.try_join() {
                return Joined {
                    leader: false,
                    shared: existing.shared.clone(),
                    guard,
                };
            }
        }

        let waiters = Waiters::new();
        let call = start(waiters.token.clone());
        let registry = self.calls.clone();
        let key = signature.to_string();
        let owner = waiters.clone();
        let shared = async move {
            let outcome = call.await;
            let mut calls = registry.lock();
            if calls
                .get(&key)
                .is_some_and(|c| Arc::ptr_eq(&c.waiters, &owner))
            {
                calls.remove(&key);
            }
            outcome
        }
        .boxed()
        .shared();

        let guard = waiters.first();
        calls.insert(
            signature.to_string(),
            Call {
                shared: shared.clone(),
                waiters,
            },
        );
        drop(calls);
        tokio::spawn(shared.clone().map(|_| ()));
        Joined {
            leader: true,
            shared,
            guard,
        }
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.calls.lock().contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
