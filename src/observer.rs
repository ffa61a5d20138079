//! Synchronous publish/subscribe.
//!
//! Handlers run on the publishing thread, in subscription order, without any
//! internal lock held. A handler may therefore subscribe or unsubscribe (itself
//! included) while a delivery is in progress; a handler removed mid-delivery is
//! not called for the remainder of that delivery.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

pub struct Publisher<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Publisher<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(handler))
    }

    pub(crate) fn subscribe_arc(&self, handler: Handler<T>) -> Subscription {
        let id = {
            let mut reg = self.registry.lock();
            let id = reg.next_id;
            reg.next_id += 1;
            reg.handlers.push((id, handler));
            id
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(reg) = weak.upgrade() {
                    reg.lock().handlers.retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    pub fn publish(&self, value: &T) {
        let snapshot: Vec<(u64, Handler<T>)> = self.registry.lock().handlers.clone();
        for (id, handler) in snapshot {
            let live = self.registry.lock().handlers.iter().any(|(h, _)| *h == id);
            if live {
                handler(value);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().handlers.len()
    }
}

impl<T: 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
