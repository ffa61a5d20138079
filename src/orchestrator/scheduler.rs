//! Concurrency cap with priority-ordered waiters.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::types::Priority;
use crate::{Error, Result};

struct Waiter {
    rank: u8,
    seq: u64,
    tx: oneshot::Sender<Slot>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // max-heap: higher rank first, then earlier arrival
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    max: usize,
    running: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

/// Bounds the number of running network calls.
///
/// A released slot is handed directly to the best waiter, so a burst of
/// low-priority work cannot overtake a queued high-priority request.
#[derive(Clone)]
pub struct SlotScheduler {
    inner: Arc<Mutex<Inner>>,
}

/// A running slot; returned to the scheduler on drop.
pub struct Slot {
    inner: Option<Arc<Mutex<Inner>>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            release(inner);
        }
    }
}

fn release(inner: Arc<Mutex<Inner>>) {
    let mut guard = inner.lock();
    while let Some(waiter) = guard.waiters.pop() {
        let handoff = Slot {
            inner: Some(Arc::clone(&inner)),
        };
        match waiter.tx.send(handoff) {
            Ok(()) => return,
            // waiter gave up; defuse the slot so it doesn't re-enter release
            Err(mut unclaimed) => unclaimed.inner = None,
        }
    }
    guard.running = guard.running.saturating_sub(1);
}

impl SlotScheduler {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max: max.max(1),
                running: 0,
                next_seq: 0,
                waiters: BinaryHeap::new(),
            })),
        }
    }

    /// Wait for a slot. Dropping the returned future while waiting gives up
    /// the place in line without leaking a slot.
    pub async fn acquire(&self, priority: Priority) -> Result<Slot> {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.running < inner.max && inner.waiters.is_empty() {
                inner.running += 1;
                return Ok(Slot {
                    inner: Some(Arc::clone(&self.inner)),
                });
            }
            let (tx, rx) = oneshot::channel();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.waiters.push(Waiter {
                rank: priority.rank(),
                seq,
                tx,
            });
            rx
        };
        rx.await
            .map_err(|_| Error::runtime("slot scheduler dropped a waiter"))
    }

    pub fn try_acquire(&self) -> Option<Slot> {
        let mut inner = self.inner.lock();
        if inner.running < inner.max && inner.waiters.is_empty() {
            inner.running += 1;
            Some(Slot {
                inner: Some(Arc::clone(&self.inner)),
            })
        } else {
            None
        }
    }

    pub fn running(&self) -> usize {
        self.inner.lock().running
    }

    pub fn waiting(&self) -> usize {
        self.inner
            .lock()
            .waiters
            .iter()
            .filter(|w| !w.tx.is_closed())
            .count()
    }

    pub fn max(&self) -> usize {
        self.inner.lock().max
    }
}
