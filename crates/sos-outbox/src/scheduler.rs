//! Sync scheduler: decides when drain cycles run.
//!
//! Cycles run only while the device is online, an identity is available and
//! the remote client is reachable. While those hold, a cycle is attempted on
//! every tick, and once immediately when they first all become true. At most
//! one cycle runs at a time; a trigger that arrives during a cycle is dropped.
//! Shutdown stops the loop and then waits for a running cycle to finish.

use crate::{CycleReport, StatusBroadcaster, SyncExecutor};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Conditions that must all hold before a cycle may start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub online: bool,
    pub authenticated: bool,
    pub remote_available: bool,
}

impl Preconditions {
    pub fn all_met(&self) -> bool {
        self.online && self.authenticated && self.remote_available
    }
}

/// Clears the in-flight flag when the cycle task ends, however it ends.
struct InFlightGuard(Arc<watch::Sender<bool>>);

impl InFlightGuard {
    /// Claim the flag, or `None` when a cycle already holds it.
    fn acquire(flag: &Arc<watch::Sender<bool>>) -> Option<Self> {
        let claimed = flag.send_if_modified(|running| {
            if *running {
                return false;
            }
            *running = true;
            true
        });
        claimed.then(|| Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

pub struct SyncScheduler {
    executor: Arc<SyncExecutor>,
    status: Arc<StatusBroadcaster>,
    tick: Duration,
    preconditions: watch::Sender<Preconditions>,
    in_flight: Arc<watch::Sender<bool>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(executor: Arc<SyncExecutor>, status: Arc<StatusBroadcaster>, tick: Duration) -> Self {
        let (preconditions, _) = watch::channel(Preconditions::default());
        let (shutdown, _) = watch::channel(false);
        Self {
            executor,
            status,
            tick,
            preconditions,
            in_flight: Arc::new(watch::channel(false).0),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.preconditions.send_modify(|p| p.online = online);
    }

    /// Also mirrored into the status broadcaster.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.preconditions.send_modify(|p| p.authenticated = authenticated);
        self.status.set_authenticated(authenticated);
    }

    pub fn set_remote_available(&self, remote_available: bool) {
        self.preconditions
            .send_modify(|p| p.remote_available = remote_available);
    }

    pub fn preconditions(&self) -> Preconditions {
        *self.preconditions.borrow()
    }

    pub fn is_cycle_running(&self) -> bool {
        *self.in_flight.borrow()
    }

    /// Start a cycle now if the preconditions hold and none is running.
    ///
    /// Returns the spawned cycle, or `None` when the trigger was dropped.
    pub fn trigger(&self) -> Option<JoinHandle<CycleReport>> {
        if *self.shutdown.borrow() {
            debug!("Scheduler shut down, trigger dropped");
            return None;
        }

        let preconditions = self.preconditions();
        if !preconditions.all_met() {
            debug!(?preconditions, "Sync preconditions not met, skipping cycle");
            return None;
        }

        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Drain cycle already running, trigger dropped");
            return None;
        };
        let executor = self.executor.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            executor.run_cycle().await
        }))
    }

    /// Spawn the tick loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let scheduler = Arc::clone(self);
        let mut preconditions = self.preconditions.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let tick = self.tick;

        *worker = Some(tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut were_met = preconditions.borrow_and_update().all_met();

            info!(tick_secs = tick.as_secs_f64(), "Sync scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.trigger();
                    }
                    changed = preconditions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let met = preconditions.borrow_and_update().all_met();
                        if met && !were_met {
                            info!("Sync preconditions met, starting cycle");
                            scheduler.trigger();
                        }
                        were_met = met;
                    }
                    _ = shutdown.changed() => {
                        break;
                    }
                }
            }

            info!("Sync scheduler stopped");
        }));
    }

    /// Stop the tick loop, refuse further triggers and wait until a cycle
    /// already running has finished.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        let mut in_flight = self.in_flight.subscribe();
        if *in_flight.borrow() {
            debug!("Waiting for running drain cycle");
        }
        let _ = in_flight.wait_for(|running| !*running).await;
    }
}
