use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::info;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Inner {
    show_member_names: bool,
    next_token: u64,
    subscribers: Vec<(u64, Callback)>,
}

/// Process-scoped UI preferences with explicit change subscriptions.
///
/// Currently a single toggle: whether member names are shown alongside
/// chore history. Cheap to clone; clones share state. A panicking
/// subscriber poisons the lock; the stored state is recovered, not lost.
#[derive(Clone, Default)]
pub struct Preferences {
    inner: Arc<Mutex<Inner>>,
}

/// Keeps a subscription alive; dropping it unsubscribes.
pub struct Subscription {
    inner: Weak<Mutex<Inner>>,
    token: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
            guard.subscribers.retain(|(token, _)| *token != self.token);
        }
    }
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_member_names(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .show_member_names
    }

    /// Set the toggle. Subscribers are notified only when the value changes.
    pub fn set_show_member_names(&self, value: bool) {
        let callbacks: Vec<Callback> = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.show_member_names == value {
                return;
            }
            guard.show_member_names = value;
            guard
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };

        info!(
            target: "chorehub",
            event = "preference_changed",
            key = "show_member_names",
            value
        );

        // Invoked outside the lock so a callback may read or write back.
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn subscribe(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let token = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let token = guard.next_token;
            guard.next_token += 1;
            guard.subscribers.push((token, Arc::new(f)));
            token
        };
        Subscription {
            inner: Arc::downgrade(&self.inner),
            token,
        }
    }
}
