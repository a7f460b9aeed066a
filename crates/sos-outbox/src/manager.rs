//! Outbox manager: validated entry point for producers.

use crate::{ActiveSessionState, OutboxError, OutboxResult, StatusBroadcaster};
use serde_json::Value;
use sos_database::{
    ActiveSession, CloseSessionPayload, CreateSessionPayload, LifecycleState,
    LocationSamplePayload, NewQueueRecord, Operation, OperationType, OutboxStore, QueueRecord,
    ReportPayload, SessionRef, SessionStatus,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds queue records and writes them through the durable store.
pub struct OutboxManager {
    store: Arc<dyn OutboxStore>,
    session: Arc<ActiveSessionState>,
    status: Arc<StatusBroadcaster>,
}

impl OutboxManager {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        session: Arc<ActiveSessionState>,
        status: Arc<StatusBroadcaster>,
    ) -> Self {
        Self {
            store,
            session,
            status,
        }
    }

    /// Enqueue an untyped payload for `operation_type`.
    ///
    /// The payload must decode into the typed payload for that operation.
    pub async fn enqueue(&self, operation_type: OperationType, payload: Value) -> OutboxResult<i64> {
        let operation = Operation::from_parts(operation_type, payload)
            .map_err(|e| OutboxError::InvalidPayload(format!("{operation_type}: {e}")))?;
        self.enqueue_operation(operation).await
    }

    /// Validate and durably enqueue `operation`, returning its id.
    ///
    /// A CreateSession also becomes the active session, keyed by the new id.
    pub async fn enqueue_operation(&self, operation: Operation) -> OutboxResult<i64> {
        operation.validate().map_err(OutboxError::InvalidPayload)?;

        let operation_type = operation.operation_type();
        let note = match &operation {
            Operation::CreateSession(payload) => Some(payload.note.clone()),
            _ => None,
        };

        let id = self.store.append(NewQueueRecord::new(operation)).await?;
        info!(record_id = id, operation = %operation_type, "Operation enqueued");

        if let Some(note) = note {
            self.session.set(ActiveSession::new(id, note)).await;
        }

        self.refresh_queued_count().await?;
        Ok(id)
    }

    /// Start a new session. Returns the id of its CreateSession record.
    pub async fn start_session(&self, note: impl Into<String>) -> OutboxResult<i64> {
        self.enqueue_operation(Operation::CreateSession(CreateSessionPayload {
            note: note.into(),
        }))
        .await
    }

    /// Queue a CloseSession for `session_id` and mark it `Ending` locally.
    pub async fn end_session(&self, session_id: SessionRef) -> OutboxResult<i64> {
        let id = self
            .enqueue_operation(Operation::CloseSession(CloseSessionPayload { session_id }))
            .await?;
        self.session
            .update_status_if_matches(&session_id, SessionStatus::Ending)
            .await;
        Ok(id)
    }

    /// End the active session, if there is one.
    pub async fn end_active_session(&self) -> OutboxResult<Option<i64>> {
        match self.session.current() {
            Some(session) => self.end_session(session.session_ref()).await.map(Some),
            None => {
                debug!("No active session to end");
                Ok(None)
            }
        }
    }

    pub async fn add_location_sample(
        &self,
        session_id: SessionRef,
        latitude: f64,
        longitude: f64,
    ) -> OutboxResult<i64> {
        self.enqueue_operation(Operation::AppendLocationSample(LocationSamplePayload {
            session_id,
            latitude,
            longitude,
        }))
        .await
    }

    /// Record a sample for the active session, by server id when known.
    pub async fn add_sample_to_active_session(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> OutboxResult<Option<i64>> {
        match self.session.current() {
            Some(session) => self
                .add_location_sample(session.session_ref(), latitude, longitude)
                .await
                .map(Some),
            None => {
                debug!("No active session for location sample");
                Ok(None)
            }
        }
    }

    pub async fn submit_report(&self, report: ReportPayload) -> OutboxResult<i64> {
        self.enqueue_operation(Operation::SubmitReport(report)).await
    }

    /// Remove every record. Ids keep increasing afterwards.
    pub async fn clear(&self) -> OutboxResult<usize> {
        let removed = self.store.clear().await?;
        self.status.set_queued_count(0);
        info!(removed, "Outbox cleared");
        Ok(removed)
    }

    /// Records parked as `Failed`.
    pub async fn dead_letters(&self) -> OutboxResult<Vec<QueueRecord>> {
        Ok(self.store.list_by_state(LifecycleState::Failed).await?)
    }

    /// Every record in id order, whatever its state.
    pub async fn records(&self) -> OutboxResult<Vec<QueueRecord>> {
        Ok(self.store.get_all().await?)
    }

    pub async fn queued_count(&self) -> OutboxResult<usize> {
        Ok(self.store.count_by_state(LifecycleState::Queued).await?)
    }

    /// Recount `Queued` records and publish the number.
    pub async fn refresh_queued_count(&self) -> OutboxResult<usize> {
        let count = self.queued_count().await?;
        self.status.set_queued_count(count);
        Ok(count)
    }

    pub fn session(&self) -> &Arc<ActiveSessionState> {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, RemoteCall};
    use chrono::Utc;
    use serde_json::json;
    use sos_database::{LocationReading, Severity};

    #[tokio::test]
    async fn create_session_scenario() {
        let h = Harness::new().await;

        let id = h
            .manager
            .enqueue(OperationType::CreateSession, json!({ "note": "help" }))
            .await
            .unwrap();
        assert_eq!(id, 1);

        let session = h.session.current().unwrap();
        assert_eq!(session.temp_id, 1);
        assert_eq!(session.status, SessionStatus::Queued);
        assert_eq!(session.backend_id, None);
        assert_eq!(h.status.snapshot().queued_count, 1);
    }

    #[tokio::test]
    async fn bare_session_id_is_a_local_reference() {
        let h = Harness::new().await;
        let temp_id = h.manager.start_session("help").await.unwrap();

        let sample = h
            .manager
            .enqueue(
                OperationType::AppendLocationSample,
                json!({ "session_id": temp_id, "latitude": 10.0, "longitude": 20.0 }),
            )
            .await
            .unwrap();

        let record = h.store.get(sample).await.unwrap().unwrap();
        assert_eq!(record.operation.session_ref(), Some(SessionRef::Local(temp_id)));

        h.remote.set_next_id(42);
        h.executor.run_cycle().await;
        assert_eq!(
            h.remote.calls(),
            vec![
                RemoteCall::CreateSession("help".into()),
                RemoteCall::AppendLocationSample(42, 10.0, 20.0),
            ]
        );
    }

    #[tokio::test]
    async fn enqueue_returns_increasing_ids() {
        let h = Harness::new().await;
        let mut last = 0;
        for n in 0..5 {
            let id = h.manager.start_session(format!("note {n}")).await.unwrap();
            assert!(id > last);
            last = id;
        }
        assert_eq!(h.status.snapshot().queued_count, 5);
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected_before_the_store() {
        let h = Harness::new().await;

        let missing_note = h.manager.enqueue(OperationType::CreateSession, json!({})).await;
        assert!(matches!(missing_note, Err(OutboxError::InvalidPayload(_))));

        let text_latitude = h
            .manager
            .enqueue(
                OperationType::AppendLocationSample,
                json!({ "session_id": { "local": 1 }, "latitude": "10", "longitude": 20 }),
            )
            .await;
        assert!(matches!(text_latitude, Err(OutboxError::InvalidPayload(_))));

        let out_of_range = h
            .manager
            .add_location_sample(SessionRef::Local(1), 91.0, 0.0)
            .await;
        assert!(matches!(out_of_range, Err(OutboxError::InvalidPayload(_))));

        assert!(h.manager.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn end_session_marks_ending() {
        let h = Harness::new().await;
        let temp_id = h.manager.start_session("help").await.unwrap();

        let close_id = h.manager.end_active_session().await.unwrap().unwrap();
        assert!(close_id > temp_id);
        assert_eq!(h.session.current().unwrap().status, SessionStatus::Ending);

        let record = h.store.get(close_id).await.unwrap().unwrap();
        assert_eq!(record.operation.session_ref(), Some(SessionRef::Local(temp_id)));
    }

    #[tokio::test]
    async fn active_session_helpers_without_session() {
        let h = Harness::new().await;
        assert_eq!(h.manager.end_active_session().await.unwrap(), None);
        assert_eq!(h.manager.add_sample_to_active_session(1.0, 2.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sample_uses_backend_id_once_known() {
        let h = Harness::new().await;
        let temp_id = h.manager.start_session("help").await.unwrap();
        let before = h.manager.add_sample_to_active_session(10.0, 20.0).await.unwrap().unwrap();

        h.session.reconcile(temp_id, 42).await;
        let after = h.manager.add_sample_to_active_session(10.0, 20.0).await.unwrap().unwrap();

        let before = h.store.get(before).await.unwrap().unwrap();
        let after = h.store.get(after).await.unwrap().unwrap();
        assert_eq!(before.operation.session_ref(), Some(SessionRef::Local(temp_id)));
        assert_eq!(after.operation.session_ref(), Some(SessionRef::Remote(42)));
    }

    #[tokio::test]
    async fn clear_resets_queue_and_count() {
        let h = Harness::new().await;
        h.manager.start_session("a").await.unwrap();
        let last = h
            .manager
            .submit_report(ReportPayload {
                category: "pothole".to_string(),
                severity: Severity::Medium,
                description: "deep one".to_string(),
                location: LocationReading {
                    latitude: 1.0,
                    longitude: 2.0,
                    recorded_at: Utc::now(),
                },
            })
            .await
            .unwrap();

        assert_eq!(h.manager.clear().await.unwrap(), 2);
        assert_eq!(h.manager.queued_count().await.unwrap(), 0);
        assert_eq!(h.status.snapshot().queued_count, 0);

        let next = h.manager.start_session("b").await.unwrap();
        assert!(next > last);
    }
}
