//! Store traits consumed by the outbox engine, and their SQLite implementation.

use crate::{queries, ActiveSession, AsyncDatabase, DatabaseResult, LifecycleState, NewQueueRecord, QueueRecord};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Durable outbox queue.
///
/// Every method is atomic for the record it touches.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new `Queued` record and return its id once durable.
    async fn append(&self, record: NewQueueRecord) -> DatabaseResult<i64>;

    async fn get(&self, id: i64) -> DatabaseResult<Option<QueueRecord>>;

    /// Records in `state`, ascending by id.
    async fn list_by_state(&self, state: LifecycleState) -> DatabaseResult<Vec<QueueRecord>>;

    async fn get_all(&self) -> DatabaseResult<Vec<QueueRecord>>;

    /// Move a record to `state`; `retry_count` replaces the counter when given.
    async fn set_state(
        &self,
        id: i64,
        state: LifecycleState,
        retry_count: Option<u32>,
    ) -> DatabaseResult<bool>;

    /// Shallow-merge top-level keys into a record's payload.
    async fn merge_payload(&self, id: i64, partial: Map<String, Value>) -> DatabaseResult<bool>;

    async fn remove(&self, id: i64) -> DatabaseResult<bool>;

    async fn clear(&self) -> DatabaseResult<usize>;

    async fn count_by_state(&self, state: LifecycleState) -> DatabaseResult<usize>;

    /// Return records stranded in `Sending` to `Queued`.
    async fn reset_sending_to_queued(&self) -> DatabaseResult<usize>;
}

/// Persistence for the active-session projection.
#[async_trait]
pub trait ActiveSessionStore: Send + Sync {
    async fn load_active_session(&self) -> DatabaseResult<Option<ActiveSession>>;

    async fn save_active_session(&self, session: ActiveSession) -> DatabaseResult<()>;

    async fn delete_active_session(&self) -> DatabaseResult<()>;
}

#[async_trait]
impl OutboxStore for AsyncDatabase {
    async fn append(&self, record: NewQueueRecord) -> DatabaseResult<i64> {
        self.call(move |conn| queries::insert_record(conn, &record)).await
    }

    async fn get(&self, id: i64) -> DatabaseResult<Option<QueueRecord>> {
        self.call(move |conn| queries::get_record(conn, id)).await
    }

    async fn list_by_state(&self, state: LifecycleState) -> DatabaseResult<Vec<QueueRecord>> {
        self.call(move |conn| queries::list_by_state(conn, state)).await
    }

    async fn get_all(&self) -> DatabaseResult<Vec<QueueRecord>> {
        self.call(queries::get_all).await
    }

    async fn set_state(
        &self,
        id: i64,
        state: LifecycleState,
        retry_count: Option<u32>,
    ) -> DatabaseResult<bool> {
        self.call(move |conn| queries::set_state(conn, id, state, retry_count))
            .await
    }

    async fn merge_payload(&self, id: i64, partial: Map<String, Value>) -> DatabaseResult<bool> {
        self.call(move |conn| queries::merge_payload(conn, id, &partial))
            .await
    }

    async fn remove(&self, id: i64) -> DatabaseResult<bool> {
        self.call(move |conn| queries::remove(conn, id)).await
    }

    async fn clear(&self) -> DatabaseResult<usize> {
        self.call(queries::clear).await
    }

    async fn count_by_state(&self, state: LifecycleState) -> DatabaseResult<usize> {
        self.call(move |conn| queries::count_by_state(conn, state))
            .await
    }

    async fn reset_sending_to_queued(&self) -> DatabaseResult<usize> {
        self.call(queries::reset_sending_to_queued).await
    }
}

#[async_trait]
impl ActiveSessionStore for AsyncDatabase {
    async fn load_active_session(&self) -> DatabaseResult<Option<ActiveSession>> {
        self.call(queries::load_active_session).await
    }

    async fn save_active_session(&self, session: ActiveSession) -> DatabaseResult<()> {
        self.call(move |conn| queries::save_active_session(conn, &session))
            .await
    }

    async fn delete_active_session(&self) -> DatabaseResult<()> {
        self.call(|conn| queries::delete_active_session(conn).map(|_| ()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CreateSessionPayload, Operation, SessionStatus};
    use tempfile::tempdir;

    fn create_session(note: &str) -> NewQueueRecord {
        NewQueueRecord::new(Operation::CreateSession(CreateSessionPayload {
            note: note.to_string(),
        }))
    }

    #[tokio::test]
    async fn test_ids_increase_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.sqlite");

        let db = AsyncDatabase::open(&path).await.unwrap();
        let first = db.append(create_session("a")).await.unwrap();
        let second = db.append(create_session("b")).await.unwrap();
        db.remove(second).await.unwrap();
        db.close().await.unwrap();

        let db = AsyncDatabase::open(&path).await.unwrap();
        let third = db.append(create_session("c")).await.unwrap();
        assert!(first < second);
        assert!(third > second);

        let all = db.get_all().await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first, third]);
    }

    #[tokio::test]
    async fn test_active_session_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.sqlite");

        let db = AsyncDatabase::open(&path).await.unwrap();
        let mut session = ActiveSession::new(1, "help");
        session.status = SessionStatus::Syncing;
        db.save_active_session(session).await.unwrap();
        db.close().await.unwrap();

        let db = AsyncDatabase::open(&path).await.unwrap();
        let loaded = db.load_active_session().await.unwrap().unwrap();
        assert_eq!(loaded.temp_id, 1);
        assert_eq!(loaded.status, SessionStatus::Syncing);

        db.delete_active_session().await.unwrap();
        assert!(db.load_active_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_trait_object() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let store: std::sync::Arc<dyn OutboxStore> = std::sync::Arc::new(db);

        let id = store.append(create_session("help")).await.unwrap();
        assert_eq!(store.count_by_state(LifecycleState::Queued).await.unwrap(), 1);

        store.set_state(id, LifecycleState::Sending, None).await.unwrap();
        assert_eq!(store.reset_sending_to_queued().await.unwrap(), 1);

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.get(id).await.unwrap().is_none());
    }
}
