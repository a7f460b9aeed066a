//! Engine state shared by every command.

use sos_config_and_utils::{Config, Paths, SyncLock};
use sos_database::{ActiveSessionStore, AsyncDatabase, OutboxStore};
use sos_outbox::{
    ActiveSessionState, HttpRemoteService, OutboxManager, OutboxResult, RetryPolicy,
    SenderConfig, StatusBroadcaster, SyncExecutor, SyncScheduler,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Every outbox component, wired over one database.
pub struct Engine {
    /// Async database executor with dedicated SQLite thread.
    pub db: AsyncDatabase,
    pub session: Arc<ActiveSessionState>,
    pub status: Arc<StatusBroadcaster>,
    pub manager: OutboxManager,
    pub remote: Arc<HttpRemoteService>,
    pub executor: Arc<SyncExecutor>,
    pub scheduler: Arc<SyncScheduler>,
    /// Held by processes that drain; `None` for enqueue-only commands.
    sync_lock: Option<SyncLock>,
}

impl Engine {
    pub async fn open(config: &Config, paths: &Paths) -> Result<Self, Box<dyn std::error::Error>> {
        let db = AsyncDatabase::open(&paths.database_file())
            .await
            .map_err(|e| format!("Failed to open outbox database: {}", e))?;
        info!(path = %paths.database_file().display(), "Outbox database opened");

        let store: Arc<dyn OutboxStore> = Arc::new(db.clone());
        let persistence: Arc<dyn ActiveSessionStore> = Arc::new(db.clone());

        let session = Arc::new(ActiveSessionState::new(Some(persistence)));
        if let Some(restored) = session.restore().await {
            info!(
                temp_id = restored.temp_id,
                backend_id = ?restored.backend_id,
                status = restored.status.as_str(),
                "Active session restored"
            );
        }

        let status = Arc::new(StatusBroadcaster::new());
        let manager = OutboxManager::new(store.clone(), session.clone(), status.clone());
        manager.refresh_queued_count().await?;

        let remote = Arc::new(HttpRemoteService::new(
            SenderConfig {
                api_url: config.api_url.clone(),
                timeout_secs: config.request_timeout_secs,
            },
            config.access_token.clone(),
        )?);

        let executor = Arc::new(SyncExecutor::new(
            store,
            remote.clone(),
            session.clone(),
            status.clone(),
            RetryPolicy::new(config.max_delivery_attempts, config.authorization_retry_cap),
        ));

        let scheduler = Arc::new(SyncScheduler::new(
            executor.clone(),
            status.clone(),
            config.sync_interval(),
        ));
        scheduler.set_authenticated(remote.has_auth_token());
        scheduler.set_remote_available(true);

        Ok(Self {
            db,
            session,
            status,
            manager,
            remote,
            executor,
            scheduler,
            sync_lock: None,
        })
    }

    /// Keep `lock` for the engine's lifetime and return records an
    /// interrupted run left in `Sending` to the queue.
    pub async fn claim_sync(&mut self, lock: SyncLock) -> OutboxResult<usize> {
        info!(path = %lock.path().display(), pid = lock.pid(), "Sync lock acquired");
        self.sync_lock = Some(lock);
        let recovered = self.executor.recover().await?;
        if recovered > 0 {
            self.manager.refresh_queued_count().await?;
        }
        Ok(recovered)
    }

    pub fn holds_sync_lock(&self) -> bool {
        self.sync_lock.is_some()
    }

    /// Stop the scheduler, close the database, then release the sync lock.
    pub async fn close(self) {
        self.scheduler.shutdown().await;
        if let Err(e) = self.db.close().await {
            warn!(error = %e, "Failed to close outbox database");
        }
    }
}
