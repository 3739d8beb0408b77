//! Subscriber Registry
//!
//! Explicit publish/subscribe registry used by every component that emits
//! events (state transitions, router notifications, reconnection lifecycle).
//!
//! The registry only holds `Weak` handles: the subscriber's owner decides how
//! long it lives, and a dropped subscriber is pruned on the next publish.
//! Publication works on a snapshot of the list, so subscribing or
//! unsubscribing from inside a callback is safe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use parking_lot::RwLock;

/// Receives events of type `E`.
pub trait Subscriber<E>: Send + Sync {
    /// Called synchronously for every published event.
    fn on_event(&self, event: &E);
}

impl<E, F> Subscriber<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Handle returned by [`Subscribers::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Entry<E> = (SubscriptionId, Weak<dyn Subscriber<E>>);

/// Registry of non-owning subscribers.
pub struct Subscribers<E> {
    entries: RwLock<Vec<Entry<E>>>,
    next_id: AtomicU64,
}

impl<E> Subscribers<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber. The registry keeps only a weak reference.
    pub fn subscribe<S>(&self, subscriber: &Arc<S>) -> SubscriptionId
    where
        S: Subscriber<E> + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let weak: Weak<dyn Subscriber<E>> = Arc::downgrade(subscriber) as Weak<dyn Subscriber<E>>;
        self.entries.write().push((id, weak));
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Deliver `event` to every live subscriber in registration order.
    ///
    /// Returns the number of subscribers notified.
    pub fn publish(&self, event: &E) -> usize {
        let snapshot: Vec<Entry<E>> = self.entries.read().clone();

        let mut delivered = 0;
        let mut dead = false;
        for (_, weak) in &snapshot {
            match weak.upgrade() {
                Some(subscriber) => {
                    subscriber.on_event(event);
                    delivered += 1;
                }
                None => dead = true,
            }
        }

        if dead {
            self.entries.write().retain(|(_, weak)| weak.strong_count() > 0);
        }

        delivered
    }

    /// Number of subscribers still alive.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    /// True when no live subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_publish_in_registration_order() {
        let registry: Subscribers<u32> = Subscribers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            Arc::new(move |e: &u32| seen.lock().push(("first", *e)))
        };
        let second = {
            let seen = seen.clone();
            Arc::new(move |e: &u32| seen.lock().push(("second", *e)))
        };

        registry.subscribe(&first);
        registry.subscribe(&second);

        assert_eq!(registry.publish(&7), 2);
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let registry: Subscribers<u32> = Subscribers::new();
        let count = Arc::new(AtomicU64::new(0));

        let subscriber = {
            let count = count.clone();
            Arc::new(move |_: &u32| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        registry.subscribe(&subscriber);
        assert_eq!(registry.len(), 1);

        drop(subscriber);
        assert_eq!(registry.publish(&1), 0);
        assert!(registry.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let registry: Subscribers<u32> = Subscribers::new();
        let subscriber = Arc::new(|_: &u32| {});

        let id = registry.subscribe(&subscriber);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.publish(&1), 0);
    }

    #[test]
    fn test_subscribe_during_publish() {
        let registry: Arc<Subscribers<u32>> = Arc::new(Subscribers::new());
        let late = Arc::new(|_: &u32| {});

        let adder = {
            let registry = registry.clone();
            let late = late.clone();
            Arc::new(move |_: &u32| {
                registry.subscribe(&late);
            })
        };
        registry.subscribe(&adder);

        // Snapshot publication: the subscriber added mid-publish is not called this round.
        assert_eq!(registry.publish(&1), 1);
        assert_eq!(registry.len(), 2);
    }
}
