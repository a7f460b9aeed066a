//! Temp-id to server-id reconciliation.

use crate::{ActiveSessionState, OutboxResult};
use serde_json::{Map, Value};
use sos_database::{LifecycleState, OutboxStore, SessionRef};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ReconciliationService {
    store: Arc<dyn OutboxStore>,
    session: Arc<ActiveSessionState>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn OutboxStore>, session: Arc<ActiveSessionState>) -> Self {
        Self { store, session }
    }

    /// Point everything that still names session `temp_id` at `backend_id`.
    ///
    /// Updates the active session when it originated from `temp_id`, then
    /// rewrites the `session_id` of every pending record referencing
    /// `Local(temp_id)`. Returns how many records were rewritten.
    pub async fn reconcile(&self, temp_id: i64, backend_id: i64) -> OutboxResult<usize> {
        if self.session.reconcile(temp_id, backend_id).await {
            debug!(temp_id, backend_id, "Active session reconciled");
        }

        let local = SessionRef::Local(temp_id);
        let partial = session_rewrite(backend_id)?;

        let mut rewritten = 0;
        for state in [LifecycleState::Queued, LifecycleState::Sending] {
            for record in self.store.list_by_state(state).await? {
                if record.operation.session_ref() != Some(local) {
                    continue;
                }
                if self.store.merge_payload(record.id, partial.clone()).await? {
                    rewritten += 1;
                }
            }
        }

        info!(temp_id, backend_id, rewritten, "Session reconciled");
        Ok(rewritten)
    }
}

/// Top-level payload keys that point a record at `backend_id`.
fn session_rewrite(backend_id: i64) -> OutboxResult<Map<String, Value>> {
    let mut partial = Map::new();
    partial.insert(
        "session_id".to_string(),
        serde_json::to_value(SessionRef::Remote(backend_id))?,
    );
    Ok(partial)
}
