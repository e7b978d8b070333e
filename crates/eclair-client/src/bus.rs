//! Process-wide publish/subscribe hub.
//!
//! Topics are string keys; subscribers of a topic are kept in registration
//! order.  [`EventBus::publish`] dispatches synchronously on the caller's
//! thread.  A publish issued while a dispatch is already running (a handler
//! publishing, or another thread) is queued and delivered after the current
//! dispatch finishes, so ordering stays deterministic and nothing recurses.
//!
//! The bus is a live signal, not a log: late subscribers miss earlier
//! events.  A failing or panicking handler is logged and the remaining
//! handlers still run.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error};

use crate::events::BusEvent;
use crate::state::lock;

/// Callback invoked for each event of a subscribed topic.
pub type Handler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscribers: HashMap<String, Vec<Registration>>,
    pending: VecDeque<BusEvent>,
    dispatching: bool,
    next_id: u64,
}

/// Cloneable handle on the bus; all clones share the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });

        debug!(topic, id, "bus subscription added");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `event` to every current subscriber of its topic.
    pub fn publish(&self, event: BusEvent) {
        {
            let mut inner = lock(&self.inner);
            inner.pending.push_back(event);
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
        }

        loop {
            let (event, handlers) = {
                let mut inner = lock(&self.inner);
                let Some(event) = inner.pending.pop_front() else {
                    inner.dispatching = false;
                    break;
                };
                let handlers: Vec<Handler> = inner
                    .subscribers
                    .get(event.topic())
                    .map(|regs| regs.iter().map(|r| r.handler.clone()).collect())
                    .unwrap_or_default();
                (event, handlers)
            };

            for handler in handlers {
                dispatch_one(&event, &handler);
            }
        }
    }

    /// Number of live handlers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.inner)
            .subscribers
            .get(topic)
            .map_or(0, Vec::len)
    }
}

fn dispatch_one(event: &BusEvent, handler: &Handler) {
    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(topic = event.topic(), error = %e, "bus handler failed");
        }
        Err(_) => {
            error!(topic = event.topic(), "bus handler panicked");
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Unsubscribing is idempotent and also happens on drop.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    topic: String,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(bus) = self.bus.upgrade() else {
            return;
        };

        // The removed handler may own the last reference to a service that
        // itself holds subscriptions; drop it only after the lock is gone.
        let removed = {
            let mut inner = lock(&bus);
            let removed = inner.subscribers.get_mut(&self.topic).and_then(|regs| {
                regs.iter()
                    .position(|r| r.id == self.id)
                    .map(|idx| regs.remove(idx))
            });
            if inner
                .subscribers
                .get(&self.topic)
                .map_or(false, Vec::is_empty)
            {
                inner.subscribers.remove(&self.topic);
            }
            removed
        };

        debug!(topic = %self.topic, id = self.id, "bus subscription released");
        drop(removed);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
