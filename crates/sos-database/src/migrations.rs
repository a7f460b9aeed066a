//! Schema migrations.
//!
//! Each entry runs once, inside its own transaction, and is recorded in the
//! `migrations` table. Append new entries; never edit applied ones.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    // AUTOINCREMENT keeps ids from being reused after deletes or a full clear.
    Migration {
        version: 1,
        name: "outbox",
        sql: "
            CREATE TABLE outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                lifecycle_state TEXT NOT NULL DEFAULT 'queued',
                retry_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX idx_outbox_lifecycle_state ON outbox(lifecycle_state, id);
        ",
    },
    Migration {
        version: 2,
        name: "active_session",
        sql: "
            CREATE TABLE active_session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                temp_id INTEGER NOT NULL,
                backend_id INTEGER,
                note TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                start_time TEXT NOT NULL
            );
        ",
    },
];

/// Latest schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Apply every migration newer than the recorded version.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let applied: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;
    if applied >= CURRENT_VERSION {
        debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "Migration applied");
    }
    Ok(())
}
