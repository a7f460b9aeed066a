//! Process-wide sync status with synchronous subscribers.

use crate::listeners::{ListenerSet, SubscriptionId};
use parking_lot::RwLock;
use serde::Serialize;

/// Summary of sync state for observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// A drain cycle is working through a non-empty batch.
    pub draining: bool,
    /// Records currently in `Queued`.
    pub queued_count: usize,
    /// An identity is available for the remote service.
    pub authenticated: bool,
}

/// Owns the current [`SyncStatus`] and notifies subscribers on every change.
///
/// Not persisted. Share it with `Arc`.
#[derive(Default)]
pub struct StatusBroadcaster {
    state: RwLock<SyncStatus>,
    listeners: ListenerSet<SyncStatus>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncStatus {
        *self.state.read()
    }

    pub fn set_draining(&self, draining: bool) {
        self.update(|status| status.draining = draining);
    }

    pub fn set_queued_count(&self, queued_count: usize) {
        self.update(|status| status.queued_count = queued_count);
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.update(|status| status.authenticated = authenticated);
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn update(&self, mutate: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut state = self.state.write();
            mutate(&mut state);
            *state
        };
        self.listeners.notify(&snapshot);
    }
}
