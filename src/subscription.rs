//! Cancellation handles returned by everything that can be unsubscribed
//! from: store subscriptions, controller-registered listeners, and
//! composite cleanups built out of them (spec §3 "Subscription").
//!
//! A [`Subscription`] is cancelled at most once; cancelling twice, or
//! dropping it without cancelling, is always safe -- it simply never
//! fires.

use std::sync::Arc;

use parking_lot::Mutex;

/// A handle that undoes whatever registered it.
///
/// Cloning a `Subscription` clones the handle, not the effect: cancelling
/// any clone cancels all of them, and the cleanup runs exactly once.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Subscription {
    /// A subscription whose cancellation does nothing observable.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(|| {})))),
        }
    }

    /// Wraps a single cleanup closure, run at most once on [`cancel`](Self::cancel).
    pub fn closure<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(cleanup)))),
        }
    }

    /// Combines several subscriptions into one: cancelling the result
    /// cancels every member, in the order given.
    pub fn combined(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let members: Vec<Subscription> = subscriptions.into_iter().collect();
        Self::closure(move || {
            for member in members {
                member.cancel();
            }
        })
    }

    /// Runs the cleanup, if it has not already run.
    pub fn cancel(&self) {
        if let Some(cleanup) = self.inner.lock().take() {
            cleanup();
        }
    }

    /// `true` iff [`cancel`](Self::cancel) has already run (on this handle
    /// or any clone of it).
    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_cancels_without_panicking() {
        let sub = Subscription::empty();
        sub.cancel();
        assert!(sub.is_cancelled());
    }

    #[test]
    fn closure_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::closure(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.cancel();
        sub.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clone_shares_cancellation() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::closure(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let clone = sub.clone();
        clone.cancel();
        assert!(sub.is_cancelled());
        sub.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn combined_cancels_all_members() {
        let count = Arc::new(AtomicUsize::new(0));
        let subs: Vec<Subscription> = (0..3)
            .map(|_| {
                let c = count.clone();
                Subscription::closure(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        let combined = Subscription::combined(subs);
        combined.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
