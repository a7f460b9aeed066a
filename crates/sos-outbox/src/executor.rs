//! Drain cycle: replay queued records against the remote service.
//!
//! One cycle takes the ids of every `Queued` record, in id order, and handles
//! them one at a time. Each record is read again right before it is handled,
//! so a session id rewritten by an earlier reconcile in the same cycle is the
//! one that gets dispatched.
//!
//!
//! - exhausted records (`retry_count >= max_attempts`) are parked as `Failed`
//! - others are marked `Sending` and dispatched
//! - on success the record is deleted; a CreateSession is reconciled first so
//!   dependents already carry the server id when the record disappears
//! - on failure the record returns to `Queued` with a bumped retry counter,
//!   capped for authorization failures
//!
//! A store error abandons the rest of the cycle. Records it left in `Sending`
//! stay there until [`SyncExecutor::recover`] runs at the next startup; a
//! cycle never touches `Sending` rows it did not mark itself.

use crate::{
    ActiveSessionState, FailureClass, OutboxResult, ReconciliationService, RemoteError,
    RemoteResult, RemoteService, StatusBroadcaster,
};
use serde::Serialize;
use sos_database::{LifecycleState, Operation, OutboxStore, QueueRecord, SessionRef, SessionStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Retry limits for the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// A record whose counter reaches this is parked as `Failed`.
    pub max_attempts: u32,
    /// Authorization failures never push the counter above this.
    pub authorization_retry_cap: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            authorization_retry_cap: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, authorization_retry_cap: u32) -> Self {
        Self {
            max_attempts,
            authorization_retry_cap,
        }
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_attempts
    }

    pub fn next_retry_count(&self, retry_count: u32, class: FailureClass) -> u32 {
        let next = retry_count.saturating_add(1);
        match class {
            FailureClass::AuthorizationRequired => next.min(self.authorization_retry_cap),
            FailureClass::Transient => next,
        }
    }
}

/// Outcome counters for one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub dispatched: usize,
    pub delivered: usize,
    pub requeued: usize,
    /// Records parked as `Failed` in this cycle.
    pub failed: usize,
    /// A store error cut the cycle short.
    pub aborted: bool,
}

/// Runs drain cycles. The caller guarantees cycles never overlap.
pub struct SyncExecutor {
    store: Arc<dyn OutboxStore>,
    remote: Arc<dyn RemoteService>,
    reconciler: ReconciliationService,
    session: Arc<ActiveSessionState>,
    status: Arc<StatusBroadcaster>,
    policy: RetryPolicy,
}

impl SyncExecutor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        remote: Arc<dyn RemoteService>,
        session: Arc<ActiveSessionState>,
        status: Arc<StatusBroadcaster>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            reconciler: ReconciliationService::new(store.clone(), session.clone()),
            store,
            remote,
            session,
            status,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one drain cycle. Never fails: store errors end the cycle early and
    /// are reported through `CycleReport::aborted`.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        if let Err(e) = self.drain(&mut report).await {
            report.aborted = true;
            warn!(error = %e, "Drain cycle aborted");
        }

        if self.status.snapshot().draining {
            self.status.set_draining(false);
        }
        if let Err(e) = self.publish_queued_count().await {
            warn!(error = %e, "Failed to refresh queued count");
        }

        if report.dispatched > 0 || report.failed > 0 || report.aborted {
            info!(
                dispatched = report.dispatched,
                delivered = report.delivered,
                requeued = report.requeued,
                failed = report.failed,
                aborted = report.aborted,
                "Drain cycle finished"
            );
        } else {
            debug!("Drain cycle found nothing to send");
        }

        report
    }

    /// Return records stranded in `Sending` by an interrupted run to `Queued`.
    ///
    /// Only safe while no other process is draining the same store, so call
    /// it once at startup while holding the sync lock.
    pub async fn recover(&self) -> OutboxResult<usize> {
        let recovered = self.store.reset_sending_to_queued().await?;
        if recovered > 0 {
            warn!(count = recovered, "Recovered records stranded in sending");
        }
        Ok(recovered)
    }

    async fn drain(&self, report: &mut CycleReport) -> OutboxResult<()> {
        let ids: Vec<i64> = self
            .store
            .list_by_state(LifecycleState::Queued)
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        debug!(count = ids.len(), "Draining outbox");
        self.status.set_draining(true);

        for id in ids {
            let Some(record) = self.store.get(id).await? else {
                continue;
            };
            if record.lifecycle_state != LifecycleState::Queued {
                continue;
            }
            self.process(record, report).await?;
            self.publish_queued_count().await?;
        }

        Ok(())
    }

    async fn process(&self, record: QueueRecord, report: &mut CycleReport) -> OutboxResult<()> {
        let id = record.id;

        if self.policy.is_exhausted(record.retry_count) {
            self.store.set_state(id, LifecycleState::Failed, None).await?;
            report.failed += 1;
            warn!(
                record_id = id,
                operation = %record.operation.operation_type(),
                retry_count = record.retry_count,
                "Delivery attempts exhausted, record parked as failed"
            );
            return Ok(());
        }

        self.store.set_state(id, LifecycleState::Sending, None).await?;
        report.dispatched += 1;

        let creates_session = matches!(record.operation, Operation::CreateSession(_));
        if creates_session {
            self.session
                .transition(id, SessionStatus::Queued, SessionStatus::Syncing)
                .await;
        }

        match self.dispatch(&record.operation).await {
            Ok(result) => {
                self.on_delivered(&record, result).await?;
                report.delivered += 1;
            }
            Err(e) => {
                let class = e.class();
                let retry_count = self.policy.next_retry_count(record.retry_count, class);
                self.store
                    .set_state(id, LifecycleState::Queued, Some(retry_count))
                    .await?;
                report.requeued += 1;

                if creates_session {
                    self.session
                        .transition(id, SessionStatus::Syncing, SessionStatus::Queued)
                        .await;
                }

                warn!(
                    record_id = id,
                    operation = %record.operation.operation_type(),
                    retry_count,
                    failure = ?class,
                    error = %e,
                    "Dispatch failed, record requeued"
                );
            }
        }

        Ok(())
    }

    async fn on_delivered(&self, record: &QueueRecord, result: Option<i64>) -> OutboxResult<()> {
        match &record.operation {
            Operation::CreateSession(_) => {
                if let Some(backend_id) = result {
                    self.reconciler.reconcile(record.id, backend_id).await?;
                }
                self.store.remove(record.id).await?;
            }
            Operation::CloseSession(payload) => {
                self.store.remove(record.id).await?;
                if self.session.clear_if_matches(&payload.session_id).await {
                    info!(session_id = %payload.session_id, "Active session closed");
                }
            }
            Operation::AppendLocationSample(_) | Operation::SubmitReport(_) => {
                self.store.remove(record.id).await?;
            }
        }

        debug!(
            record_id = record.id,
            operation = %record.operation.operation_type(),
            "Record delivered"
        );
        Ok(())
    }

    /// Call the remote operation for `operation`. Returns the server id for
    /// operations that create something.
    async fn dispatch(&self, operation: &Operation) -> RemoteResult<Option<i64>> {
        match operation {
            Operation::CreateSession(payload) => {
                self.remote.create_session(&payload.note).await.map(Some)
            }
            Operation::CloseSession(payload) => {
                let session_id = self.resolve(payload.session_id)?;
                self.remote.close_session(session_id).await.map(|_| None)
            }
            Operation::AppendLocationSample(payload) => {
                let session_id = self.resolve(payload.session_id)?;
                self.remote
                    .append_location_sample(session_id, payload.latitude, payload.longitude)
                    .await
                    .map(|_| None)
            }
            Operation::SubmitReport(payload) => self.remote.submit_report(payload).await.map(Some),
        }
    }

    /// Server id for `session`. A local reference resolves through the
    /// active session once its CreateSession has been confirmed.
    fn resolve(&self, session: SessionRef) -> RemoteResult<i64> {
        match session {
            SessionRef::Remote(id) => Ok(id),
            SessionRef::Local(temp_id) => self
                .session
                .current()
                .filter(|active| active.temp_id == temp_id)
                .and_then(|active| active.backend_id)
                .ok_or(RemoteError::UnresolvedSession(temp_id)),
        }
    }

    async fn publish_queued_count(&self) -> OutboxResult<()> {
        let count = self.store.count_by_state(LifecycleState::Queued).await?;
        self.status.set_queued_count(count);
        Ok(())
    }
}
