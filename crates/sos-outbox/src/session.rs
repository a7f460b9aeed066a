//! Active-session projection.
//!
//! Holds the one session the client is running, mirrors it to an optional
//! [`ActiveSessionStore`] and notifies subscribers after every change.
//! Persistence failures are logged and never block the engine: the in-memory
//! value is authoritative for the running process.

use crate::listeners::{ListenerSet, SubscriptionId};
use parking_lot::RwLock;
use sos_database::{ActiveSession, ActiveSessionStore, SessionRef, SessionStatus};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ActiveSessionState {
    current: RwLock<Option<ActiveSession>>,
    persistence: Option<Arc<dyn ActiveSessionStore>>,
    listeners: ListenerSet<Option<ActiveSession>>,
}

impl ActiveSessionState {
    pub fn new(persistence: Option<Arc<dyn ActiveSessionStore>>) -> Self {
        Self {
            current: RwLock::new(None),
            persistence,
            listeners: ListenerSet::new(),
        }
    }

    /// State that lives only in memory.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Load the persisted session, if any, into memory.
    pub async fn restore(&self) -> Option<ActiveSession> {
        let store = self.persistence.as_ref()?;
        match store.load_active_session().await {
            Ok(restored) => {
                if let Some(session) = &restored {
                    debug!(temp_id = session.temp_id, status = session.status.as_str(), "Restored active session");
                }
                *self.current.write() = restored.clone();
                self.listeners.notify(&restored);
                restored
            }
            Err(e) => {
                warn!(error = %e, "Failed to restore active session");
                None
            }
        }
    }

    pub fn current(&self) -> Option<ActiveSession> {
        self.current.read().clone()
    }

    /// Replace the current session.
    pub async fn set(&self, session: ActiveSession) {
        *self.current.write() = Some(session.clone());
        self.publish(Some(session)).await;
    }

    /// Attach the server id to the session created by record `temp_id`.
    ///
    /// No-op unless the current session originated from that record.
    pub async fn reconcile(&self, temp_id: i64, backend_id: i64) -> bool {
        self.modify(|session| {
            if session.temp_id != temp_id {
                return false;
            }
            session.backend_id = Some(backend_id);
            session.status = SessionStatus::Active;
            true
        })
        .await
    }

    /// Set `status` when the current session is named by `session_ref`.
    pub async fn update_status_if_matches(&self, session_ref: &SessionRef, status: SessionStatus) -> bool {
        self.modify(|session| {
            if !session.matches(session_ref) {
                return false;
            }
            session.status = status;
            true
        })
        .await
    }

    /// Move the session created by record `temp_id` from `from` to `to`.
    pub(crate) async fn transition(&self, temp_id: i64, from: SessionStatus, to: SessionStatus) -> bool {
        self.modify(|session| {
            if session.temp_id != temp_id || session.status != from {
                return false;
            }
            session.status = to;
            true
        })
        .await
    }

    /// Drop the current session if `session_ref` names it.
    pub async fn clear_if_matches(&self, session_ref: &SessionRef) -> bool {
        let cleared = {
            let mut current = self.current.write();
            let matches = current
                .as_ref()
                .is_some_and(|session| session.matches(session_ref));
            if matches {
                *current = None;
            }
            matches
        };
        if cleared {
            self.publish(None).await;
        }
        cleared
    }

    pub async fn clear(&self) {
        *self.current.write() = None;
        self.publish(None).await;
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Option<ActiveSession>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    async fn modify(&self, mutate: impl FnOnce(&mut ActiveSession) -> bool) -> bool {
        let updated = {
            let mut current = self.current.write();
            current.as_mut().and_then(|session| {
                if mutate(session) {
                    Some(session.clone())
                } else {
                    None
                }
            })
        };
        match updated {
            Some(session) => {
                self.publish(Some(session)).await;
                true
            }
            None => false,
        }
    }

    async fn publish(&self, session: Option<ActiveSession>) {
        if let Some(store) = &self.persistence {
            let result = match &session {
                Some(session) => store.save_active_session(session.clone()).await,
                None => store.delete_active_session().await,
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to persist active session");
            }
        }
        self.listeners.notify(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sos_database::AsyncDatabase;

    #[tokio::test]
    async fn reconcile_only_matching_temp_id() {
        let state = ActiveSessionState::in_memory();
        state.set(ActiveSession::new(1, "help")).await;

        assert!(!state.reconcile(2, 99).await);
        assert_eq!(state.current().unwrap().backend_id, None);

        assert!(state.reconcile(1, 42).await);
        let session = state.current().unwrap();
        assert_eq!(session.backend_id, Some(42));
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn clear_if_matches_by_either_id() {
        let state = ActiveSessionState::in_memory();
        state.set(ActiveSession::new(1, "help")).await;
        state.reconcile(1, 42).await;

        assert!(!state.clear_if_matches(&SessionRef::Remote(7)).await);
        assert!(state.current().is_some());

        assert!(state.clear_if_matches(&SessionRef::Remote(42)).await);
        assert!(state.current().is_none());
    }

    #[tokio::test]
    async fn transition_requires_expected_status() {
        let state = ActiveSessionState::in_memory();
        state.set(ActiveSession::new(1, "help")).await;

        assert!(!state.transition(1, SessionStatus::Active, SessionStatus::Ending).await);
        assert!(state.transition(1, SessionStatus::Queued, SessionStatus::Syncing).await);
        assert_eq!(state.current().unwrap().status, SessionStatus::Syncing);
    }

    #[tokio::test]
    async fn subscribers_see_every_change() {
        let state = ActiveSessionState::in_memory();
        let seen: Arc<Mutex<Vec<Option<SessionStatus>>>> = Arc::default();

        let sink = seen.clone();
        state.subscribe(move |session| sink.lock().push(session.as_ref().map(|s| s.status)));

        state.set(ActiveSession::new(1, "help")).await;
        state.reconcile(1, 42).await;
        state.update_status_if_matches(&SessionRef::Local(1), SessionStatus::Ending).await;
        state.clear().await;

        assert_eq!(
            *seen.lock(),
            vec![
                Some(SessionStatus::Queued),
                Some(SessionStatus::Active),
                Some(SessionStatus::Ending),
                None
            ]
        );
    }

    #[tokio::test]
    async fn persisted_session_is_restored() {
        let db: Arc<dyn ActiveSessionStore> = Arc::new(AsyncDatabase::open_in_memory().await.unwrap());

        let state = ActiveSessionState::new(Some(db.clone()));
        state.set(ActiveSession::new(3, "flat tyre")).await;
        state.reconcile(3, 77).await;

        let reopened = ActiveSessionState::new(Some(db));
        let restored = reopened.restore().await.unwrap();
        assert_eq!(restored.temp_id, 3);
        assert_eq!(restored.backend_id, Some(77));
        assert_eq!(reopened.current(), Some(restored));
    }
}
