//! Long-running sync loop.

use crate::app::Engine;
use tracing::info;

/// Run the scheduler until Ctrl-C.
pub async fn run_daemon(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting SOS outbox daemon");

    let status_sub = engine.status.subscribe(|status| {
        info!(
            draining = status.draining,
            queued_count = status.queued_count,
            authenticated = status.authenticated,
            "Sync status changed"
        );
    });
    let session_sub = engine.session.subscribe(|session| match session {
        Some(session) => info!(
            temp_id = session.temp_id,
            backend_id = ?session.backend_id,
            status = session.status.as_str(),
            "Active session changed"
        ),
        None => info!("Active session cleared"),
    });

    // No connectivity probe: the HTTP client's own failures feed the retry policy.
    engine.scheduler.set_online(true);
    engine.scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    engine.scheduler.shutdown().await;
    engine.status.unsubscribe(status_sub);
    engine.session.unsubscribe(session_sub);
    Ok(())
}
