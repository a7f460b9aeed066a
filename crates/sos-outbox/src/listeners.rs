//! Synchronous observer list shared by the status and session projections.

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Handle returned by `subscribe`, used to unsubscribe.
pub type SubscriptionId = Uuid;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of callbacks notified in subscription order.
pub struct ListenerSet<T> {
    listeners: Mutex<Vec<(SubscriptionId, Listener<T>)>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Call every current listener with `value`.
    ///
    /// The list is copied first so a listener may subscribe or unsubscribe
    /// without deadlocking.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in snapshot {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
