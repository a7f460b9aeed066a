//! One-shot commands run against the local outbox.

use crate::app::Engine;
use chrono::Utc;
use sos_config_and_utils::{CoreError, Paths, SyncLock};
use sos_database::{LocationReading, QueueRecord, ReportPayload, Severity};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Drain the queue once, if signed in and no other process is syncing.
pub async fn sync_once(engine: &mut Engine, paths: &Paths) -> CommandResult {
    if !engine.remote.has_auth_token() {
        println!("Not signed in: set SOS_ACCESS_TOKEN or access_token in config.json");
        return Ok(());
    }

    let lock = match SyncLock::acquire(&paths.lock_file()) {
        Ok(lock) => lock,
        Err(e @ CoreError::Locked { .. }) => {
            println!("{}; the running daemon will sync the queue", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    engine.claim_sync(lock).await?;

    let report = engine.executor.run_cycle().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn start_session(engine: &Engine, note: String) -> CommandResult {
    let id = engine.manager.start_session(note).await?;
    println!("Session queued (local id {})", id);
    Ok(())
}

pub async fn end_session(engine: &Engine) -> CommandResult {
    match engine.manager.end_active_session().await? {
        Some(id) => println!("Session close queued (record {})", id),
        None => println!("No active session"),
    }
    Ok(())
}

pub async fn add_sample(engine: &Engine, latitude: f64, longitude: f64) -> CommandResult {
    match engine
        .manager
        .add_sample_to_active_session(latitude, longitude)
        .await?
    {
        Some(id) => println!("Location sample queued (record {})", id),
        None => println!("No active session"),
    }
    Ok(())
}

pub async fn submit_report(
    engine: &Engine,
    category: String,
    severity: Severity,
    description: String,
    latitude: f64,
    longitude: f64,
) -> CommandResult {
    let id = engine
        .manager
        .submit_report(ReportPayload {
            category,
            severity,
            description,
            location: LocationReading {
                latitude,
                longitude,
                recorded_at: Utc::now(),
            },
        })
        .await?;
    println!("Report queued (record {})", id);
    Ok(())
}

pub async fn print_status(engine: &Engine) -> CommandResult {
    let status = engine.status.snapshot();
    println!("Queued:        {}", status.queued_count);
    println!("Dead letters:  {}", engine.manager.dead_letters().await?.len());
    println!("Signed in:     {}", engine.remote.has_auth_token());

    match engine.session.current() {
        Some(session) => {
            let backend = session
                .backend_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "Session:       local {} / remote {} ({}, started {})",
                session.temp_id,
                backend,
                session.status.as_str(),
                session.start_time.to_rfc3339()
            );
        }
        None => println!("Session:       none"),
    }
    Ok(())
}

pub async fn print_dead_letters(engine: &Engine) -> CommandResult {
    let records = engine.manager.dead_letters().await?;
    if records.is_empty() {
        println!("No dead letters");
        return Ok(());
    }
    for record in &records {
        println!("{}", describe(record));
    }
    Ok(())
}

pub async fn clear(engine: &Engine) -> CommandResult {
    let removed = engine.manager.clear().await?;
    println!("Removed {} record(s)", removed);
    Ok(())
}

fn describe(record: &QueueRecord) -> String {
    let target = record
        .operation
        .session_ref()
        .map(|r| format!(" session={}", r))
        .unwrap_or_default();
    format!(
        "#{} {} retries={} enqueued={}{}",
        record.id,
        record.operation.operation_type(),
        record.retry_count,
        record.enqueued_at.to_rfc3339(),
        target
    )
}
