//! Callback registries that outlive individual transports

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// An ordered set of callbacks.
///
/// Callbacks run in registration order. The list is snapshotted before
/// dispatch, so a callback may register or unsubscribe handlers (including
/// itself) without deadlocking.
pub(crate) struct HandlerSet<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> HandlerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub(crate) fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let mut registry = self.inner.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(callback)));

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Mutex::new(Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            }))),
        }
    }

    pub(crate) fn dispatch(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Handle returned when registering a handler.
///
/// Dropping it leaves the handler registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to detach.
pub struct Subscription {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Detach the handler. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(detach) = self.detach.lock().take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_in_registration_order() {
        let set = HandlerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen);
        let _s1 = set.add(move |v| a.lock().push(("a", *v)));
        let b = Arc::clone(&seen);
        let _s2 = set.add(move |v| b.lock().push(("b", *v)));

        set.dispatch(&1);
        set.dispatch(&2);

        assert_eq!(*seen.lock(), vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let set = HandlerSet::<u32>::new();
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        let sub = set.add(move |_| *c.lock() += 1);

        set.dispatch(&0);
        sub.unsubscribe();
        sub.unsubscribe();
        set.dispatch(&0);

        assert_eq!(*count.lock(), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_dropping_subscription_keeps_handler() {
        let set = HandlerSet::<u32>::new();
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        drop(set.add(move |_| *c.lock() += 1));

        set.dispatch(&0);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_handler_can_unsubscribe_itself() {
        let set = HandlerSet::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(Mutex::new(0));

        let slot_in = Arc::clone(&slot);
        let c = Arc::clone(&count);
        let sub = set.add(move |_| {
            *c.lock() += 1;
            if let Some(sub) = slot_in.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        set.dispatch(&0);
        set.dispatch(&0);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = HandlerSet::<u32>::new();
        let sub = set.add(|_| {});
        drop(set);
        sub.unsubscribe();
    }
}
