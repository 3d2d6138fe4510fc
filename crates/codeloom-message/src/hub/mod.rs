//! Ordered publish/subscribe fan-out for run messages.
//!
//! A [`MessageHub`] holds an explicit list of observer callbacks. Observers
//! are invoked in registration order, and messages are delivered in the order
//! they were emitted, even when several tasks emit concurrently: emitted
//! messages are queued and drained by whichever caller is not already
//! draining. Observers may unsubscribe (or emit) from inside a callback
//! without deadlocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::message::Message;

const HUB_TARGET: &str = "codeloom_message::hub";

/// Identifier returned by [`MessageHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Pending {
    messages: VecDeque<Message>,
    draining: bool,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    pending: Mutex<Pending>,
}

/// Fan-out point for run messages.
///
/// Cloning a hub yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct MessageHub {
    inner: Arc<HubInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the draining flag if an observer panics mid-delivery.
struct DrainGuard<'a> {
    pending: &'a Mutex<Pending>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.pending).draining = false;
        }
    }
}

impl MessageHub {
    /// Creates a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer and returns its subscription identifier.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.subscribers).push(Subscriber {
            id,
            active: Arc::new(AtomicBool::new(true)),
            callback: Arc::new(callback),
        });
        id
    }

    /// Removes an observer. Returns `false` when the id was not registered.
    ///
    /// Once this returns, the observer receives no message whose delivery
    /// had not already started.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let Some(position) = subscribers.iter().position(|s| s.id == id) else {
            return false;
        };
        let removed = subscribers.remove(position);
        removed.active.store(false, Ordering::SeqCst);
        true
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Publishes a message to every observer.
    ///
    /// If another caller is already delivering, the message is queued behind
    /// the ones emitted before it and delivered by that caller.
    pub fn emit(&self, message: Message) {
        {
            let mut pending = lock(&self.inner.pending);
            pending.messages.push_back(message);
            if pending.draining {
                return;
            }
            pending.draining = true;
        }

        let _guard = DrainGuard {
            pending: &self.inner.pending,
        };
        loop {
            let next = {
                let mut pending = lock(&self.inner.pending);
                let next = pending.messages.pop_front();
                // Cleared under the same lock as the empty pop so a concurrent
                // emitter cannot enqueue behind a drainer that is leaving.
                if next.is_none() {
                    pending.draining = false;
                }
                next
            };
            let Some(message) = next else {
                break;
            };
            self.deliver(&message);
        }
    }

    fn deliver(&self, message: &Message) {
        let snapshot: Vec<(Arc<AtomicBool>, Callback)> = lock(&self.inner.subscribers)
            .iter()
            .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
            .collect();

        trace!(
            target: HUB_TARGET,
            channel = %message.channel(),
            subscribers = snapshot.len(),
            "delivering message"
        );

        for (active, callback) in snapshot {
            if active.load(Ordering::SeqCst) {
                callback(message);
            }
        }
    }
}

impl std::fmt::Debug for MessageHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHub")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
