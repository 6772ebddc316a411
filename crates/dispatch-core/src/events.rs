//! A minimal, synchronous signal/slot mechanism.
//!
//! The original design used Qt-style signals delivered to owning closures,
//! RAII-scoped listeners, and weak handles that are silently skipped once
//! their receiver is gone. This emitter covers the first two: `subscribe`
//! for a listener that lives as long as the emitter (or until explicitly
//! removed), and `subscribe_scoped` for one that removes itself when the
//! returned guard drops. There is no weak-handle variant; nothing in this
//! crate has a receiver object that would benefit from one.
//!
//! Delivery is synchronous and runs on the thread calling `emit`, outside
//! any lock the emitter's owner might be holding — see call sites in
//! `task`, `claimer`, and `platform`. A callback that panics poisons no
//! shared state here (it unwinds, nothing more), but it will propagate to
//! the caller of `emit`; callbacks are expected not to panic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::lock;

type Callback<E> = dyn Fn(&E) + Send + Sync;

/// Handle returned by [`Emitter::subscribe`], used to remove that listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Entry<E> {
    id: u64,
    callback: Arc<Callback<E>>,
}

/// An emitter owning a list of subscribers for one event type.
pub struct Emitter<E> {
    subscribers: Arc<Mutex<Vec<Entry<E>>>>,
    next_id: AtomicU64,
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> Emitter<E> {
    /// Creates an emitter with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `f` to run on every future `emit`. The subscription lives
    /// until the emitter is dropped or [`Emitter::unsubscribe`] is called
    /// with the returned id.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push(Entry {
            id,
            callback: Arc::new(f),
        });
        SubscriptionId(id)
    }

    /// Registers `f` and returns a guard that removes it on drop.
    pub fn subscribe_scoped<F>(&self, f: F) -> ScopedSubscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push(Entry {
            id,
            callback: Arc::new(f),
        });
        ScopedSubscription {
            id,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Removes a subscription registered with [`Emitter::subscribe`]. A no-op
    /// if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.subscribers).retain(|entry| entry.id != id.0);
    }

    /// Delivers `event` to every current subscriber, in registration order.
    ///
    /// The subscriber list is snapshotted under the lock and released before
    /// any callback runs, so a callback that subscribes or unsubscribes
    /// re-entrantly cannot deadlock against this call.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Arc<Callback<E>>> = lock(&self.subscribers)
            .iter()
            .map(|entry| entry.callback.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

/// RAII handle returned by [`Emitter::subscribe_scoped`]. Removes its
/// listener when dropped.
pub struct ScopedSubscription<E> {
    id: u64,
    subscribers: Arc<Mutex<Vec<Entry<E>>>>,
}

impl<E> Drop for ScopedSubscription<E> {
    fn drop(&mut self) {
        lock(&self.subscribers).retain(|entry| entry.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_to_all_subscribers_in_order() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = seen.clone();
        emitter.subscribe(move |v| a.lock().unwrap().push(("a", *v)));
        let b = seen.clone();
        emitter.subscribe(move |v| b.lock().unwrap().push(("b", *v)));

        emitter.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let emitter: Emitter<u32> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = emitter.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(&1);
        emitter.unsubscribe(id);
        emitter.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scoped_subscription_removes_on_drop() {
        let emitter: Emitter<u32> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        {
            let _guard = emitter.subscribe_scoped(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
            emitter.emit(&1);
            assert_eq!(emitter.subscriber_count(), 1);
        }
        assert_eq!(emitter.subscriber_count(), 0);
        emitter.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
