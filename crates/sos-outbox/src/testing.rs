//! Test doubles shared by the unit tests in this crate.

use crate::{
    ActiveSessionState, OutboxManager, ReconciliationService, RemoteError, RemoteResult,
    RemoteService, RetryPolicy, StatusBroadcaster, SyncExecutor, SyncStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sos_database::{
    AsyncDatabase, DatabaseError, DatabaseResult, LifecycleState, NewQueueRecord, OutboxStore,
    QueueRecord, ReportPayload,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateSession(String),
    CloseSession(i64),
    AppendLocationSample(i64, f64, f64),
    SubmitReport(String),
}

/// Remote service that records calls and fails on demand.
pub struct ScriptedRemote {
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<VecDeque<RemoteError>>,
    next_id: AtomicI64,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(42),
            gate: Mutex::new(None),
        }
    }

    /// Id returned by the next create call; later calls count up from it.
    pub fn set_next_id(&self, id: i64) {
        self.next_id.store(id, Ordering::SeqCst);
    }

    /// Fail the next call with `error`. Failures are consumed in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().push_back(error);
    }

    /// Make every call wait until the returned handle is notified.
    pub fn hold_calls(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    async fn respond(&self, call: RemoteCall) -> RemoteResult<()> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.calls.lock().push(call);
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn issue_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteService for ScriptedRemote {
    async fn create_session(&self, note: &str) -> RemoteResult<i64> {
        self.respond(RemoteCall::CreateSession(note.to_string())).await?;
        Ok(self.issue_id())
    }

    async fn close_session(&self, session_id: i64) -> RemoteResult<()> {
        self.respond(RemoteCall::CloseSession(session_id)).await
    }

    async fn append_location_sample(
        &self,
        session_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> RemoteResult<()> {
        self.respond(RemoteCall::AppendLocationSample(session_id, latitude, longitude))
            .await
    }

    async fn submit_report(&self, report: &ReportPayload) -> RemoteResult<i64> {
        self.respond(RemoteCall::SubmitReport(report.category.clone())).await?;
        Ok(self.issue_id())
    }
}

/// SQLite store whose deletes can be made to fail.
pub struct FaultyStore {
    inner: AsyncDatabase,
    fail_removes: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: AsyncDatabase) -> Self {
        Self {
            inner,
            fail_removes: AtomicBool::new(false),
        }
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutboxStore for FaultyStore {
    async fn append(&self, record: NewQueueRecord) -> DatabaseResult<i64> {
        self.inner.append(record).await
    }

    async fn get(&self, id: i64) -> DatabaseResult<Option<QueueRecord>> {
        self.inner.get(id).await
    }

    async fn list_by_state(&self, state: LifecycleState) -> DatabaseResult<Vec<QueueRecord>> {
        self.inner.list_by_state(state).await
    }

    async fn get_all(&self) -> DatabaseResult<Vec<QueueRecord>> {
        self.inner.get_all().await
    }

    async fn set_state(
        &self,
        id: i64,
        state: LifecycleState,
        retry_count: Option<u32>,
    ) -> DatabaseResult<bool> {
        self.inner.set_state(id, state, retry_count).await
    }

    async fn merge_payload(&self, id: i64, partial: Map<String, Value>) -> DatabaseResult<bool> {
        self.inner.merge_payload(id, partial).await
    }

    async fn remove(&self, id: i64) -> DatabaseResult<bool> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Connection("injected remove failure".to_string()));
        }
        self.inner.remove(id).await
    }

    async fn clear(&self) -> DatabaseResult<usize> {
        self.inner.clear().await
    }

    async fn count_by_state(&self, state: LifecycleState) -> DatabaseResult<usize> {
        self.inner.count_by_state(state).await
    }

    async fn reset_sending_to_queued(&self) -> DatabaseResult<usize> {
        self.inner.reset_sending_to_queued().await
    }
}

/// Fully wired engine over an in-memory database.
pub struct Harness {
    pub store: Arc<FaultyStore>,
    pub remote: Arc<ScriptedRemote>,
    pub session: Arc<ActiveSessionState>,
    pub status: Arc<StatusBroadcaster>,
    pub manager: OutboxManager,
    pub reconciler: ReconciliationService,
    pub executor: Arc<SyncExecutor>,
}

impl Harness {
    pub async fn new() -> Self {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let store = Arc::new(FaultyStore::new(db));
        let remote = Arc::new(ScriptedRemote::new());
        let session = Arc::new(ActiveSessionState::in_memory());
        let status = Arc::new(StatusBroadcaster::new());

        let manager = OutboxManager::new(store.clone(), session.clone(), status.clone());
        let reconciler = ReconciliationService::new(store.clone(), session.clone());
        let executor = Arc::new(SyncExecutor::new(
            store.clone(),
            remote.clone(),
            session.clone(),
            status.clone(),
            RetryPolicy::default(),
        ));

        Self {
            store,
            remote,
            session,
            status,
            manager,
            reconciler,
            executor,
        }
    }

    /// Collect every status notification from now on.
    pub fn record_status(&self) -> Arc<Mutex<Vec<SyncStatus>>> {
        let seen: Arc<Mutex<Vec<SyncStatus>>> = Arc::default();
        let sink = seen.clone();
        self.status.subscribe(move |status| sink.lock().push(*status));
        seen
    }
}
