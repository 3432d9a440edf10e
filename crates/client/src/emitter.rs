//! Typed publish/subscribe channel, one per event kind.
//!
//! `on` registers a listener and hands back a [`Subscription`]. Dropping the
//! subscription (or calling [`Subscription::unsubscribe`]) removes the
//! listener; doing so twice is a no-op.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Listener<T>>>,
}

impl<T> Listeners<T> {
    fn remove(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }
}

/// Fan-out channel for values of type `T`
pub struct Emitter<T> {
    listeners: Arc<Listeners<T>>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners {
                next_id: AtomicU64::new(0),
                entries: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// subscription is dropped or unsubscribed.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.listeners.entries.lock() {
            entries.insert(id, Arc::new(listener));
        }

        let weak: Weak<Listeners<T>> = Arc::downgrade(&self.listeners);
        Subscription {
            active: AtomicBool::new(true),
            remove: Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners.remove(id);
                }
            }),
        }
    }

    /// Deliver `value` to every listener registered at the time of the call.
    ///
    /// Listeners run outside the lock, so they may subscribe or unsubscribe.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = match self.listeners.entries.lock() {
            Ok(entries) => entries.values().cloned().collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .entries
            .lock()
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

/// Handle returned by [`Emitter::on`]
pub struct Subscription {
    active: AtomicBool,
    remove: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    /// Remove the listener. Idempotent.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.remove)();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Keep the listener registered for the emitter's whole lifetime.
    pub fn detach(self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
