//! Offline outbox and sync engine.
//!
//! Remote actions are written to a durable queue first and delivered later,
//! in order, once the device is online and signed in:
//! - OutboxManager: validates and enqueues operations, tracks the active session
//! - SyncExecutor: drains the queue against a [`RemoteService`] with bounded retries
//! - ReconciliationService: rewrites temp session ids once the server assigns one
//! - SyncScheduler: runs drain cycles on a tick and when connectivity returns
//! - StatusBroadcaster: publishes queue size and draining state to observers

mod error;
mod executor;
mod listeners;
mod manager;
mod reconcile;
mod remote;
mod scheduler;
mod sender;
mod session;
mod status;

#[cfg(test)]
mod testing;

pub use error::{OutboxError, OutboxResult};
pub use executor::{CycleReport, RetryPolicy, SyncExecutor};
pub use listeners::{ListenerSet, SubscriptionId};
pub use manager::OutboxManager;
pub use reconcile::ReconciliationService;
pub use remote::{mentions_authorization, FailureClass, RemoteError, RemoteResult, RemoteService};
pub use scheduler::{Preconditions, SyncScheduler};
pub use sender::{HttpRemoteService, SenderConfig};
pub use session::ActiveSessionState;
pub use status::{StatusBroadcaster, SyncStatus};
