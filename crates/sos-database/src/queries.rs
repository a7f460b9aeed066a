//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter so it can run
//! inside `AsyncDatabase::call` or directly against an in-memory connection.

use crate::{
    ActiveSession, DatabaseError, DatabaseResult, LifecycleState, NewQueueRecord, Operation,
    OperationType, QueueRecord, SessionStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde_json::{Map, Value};
use tracing::{debug, warn};

const RECORD_COLUMNS: &str =
    "id, operation_type, payload, enqueued_at, lifecycle_state, retry_count";

// ==========================================
// Outbox
// ==========================================

/// Insert a new queue record in `Queued` state. Returns the assigned id.
pub fn insert_record(conn: &Connection, record: &NewQueueRecord) -> DatabaseResult<i64> {
    let payload = record.operation.payload_json()?.to_string();
    conn.execute(
        "INSERT INTO outbox (operation_type, payload, enqueued_at, lifecycle_state, retry_count)
         VALUES (?1, ?2, ?3, 'queued', 0)",
        params![
            record.operation.operation_type().as_str(),
            payload,
            record.enqueued_at.to_rfc3339(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(record_id = id, operation = %record.operation.operation_type(), "Outbox record inserted");
    Ok(id)
}

/// Get a queue record by ID.
pub fn get_record(conn: &Connection, id: i64) -> DatabaseResult<Option<QueueRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM outbox WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], RawRecord::from_row);

    match result {
        Ok(raw) => Ok(Some(raw.into_record()?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List records in the given state, ascending by id.
pub fn list_by_state(conn: &Connection, state: LifecycleState) -> DatabaseResult<Vec<QueueRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM outbox WHERE lifecycle_state = ?1 ORDER BY id ASC"
    ))?;

    let rows = stmt
        .query_map(params![state.as_str()], RawRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(decode_records(rows))
}

/// List every record, ascending by id.
pub fn get_all(conn: &Connection) -> DatabaseResult<Vec<QueueRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM outbox ORDER BY id ASC"
    ))?;

    let rows = stmt
        .query_map([], RawRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(decode_records(rows))
}

/// Set lifecycle state, optionally replacing the retry count.
///
/// Returns false when the record does not exist.
pub fn set_state(
    conn: &Connection,
    id: i64,
    state: LifecycleState,
    retry_count: Option<u32>,
) -> DatabaseResult<bool> {
    let count = match retry_count {
        Some(retry_count) => conn.execute(
            "UPDATE outbox SET lifecycle_state = ?1, retry_count = ?2 WHERE id = ?3",
            params![state.as_str(), retry_count, id],
        )?,
        None => conn.execute(
            "UPDATE outbox SET lifecycle_state = ?1 WHERE id = ?2",
            params![state.as_str(), id],
        )?,
    };
    Ok(count > 0)
}

/// Shallow-merge `partial` into the stored payload of a record.
///
/// The merged payload must still decode as the record's operation type,
/// otherwise nothing is written. Returns false when the record does not exist.
pub fn merge_payload(conn: &Connection, id: i64, partial: &Map<String, Value>) -> DatabaseResult<bool> {
    let tx = conn.unchecked_transaction()?;

    let result = tx.query_row(
        "SELECT operation_type, payload FROM outbox WHERE id = ?1",
        params![id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    );
    let (operation_type, payload) = match result {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let operation_type = OperationType::from_str(&operation_type).ok_or_else(|| {
        DatabaseError::InvalidData(format!("unknown operation type: {operation_type}"))
    })?;

    let mut merged: Value = serde_json::from_str(&payload)?;
    let object = merged.as_object_mut().ok_or_else(|| {
        DatabaseError::InvalidData(format!("payload of record {id} is not an object"))
    })?;
    for (key, value) in partial {
        object.insert(key.clone(), value.clone());
    }

    Operation::from_parts(operation_type, merged.clone())?;

    tx.execute(
        "UPDATE outbox SET payload = ?1 WHERE id = ?2",
        params![merged.to_string(), id],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Delete a record by ID.
pub fn remove(conn: &Connection, id: i64) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

/// Delete every record. The id sequence is not reset.
pub fn clear(conn: &Connection) -> DatabaseResult<usize> {
    let count = conn.execute("DELETE FROM outbox", [])?;
    Ok(count)
}

/// Count records in the given state.
pub fn count_by_state(conn: &Connection, state: LifecycleState) -> DatabaseResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE lifecycle_state = ?1",
        params![state.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Reset records stranded in `Sending` back to `Queued` (crash recovery).
pub fn reset_sending_to_queued(conn: &Connection) -> DatabaseResult<usize> {
    let count = conn.execute(
        "UPDATE outbox SET lifecycle_state = 'queued' WHERE lifecycle_state = 'sending'",
        [],
    )?;
    Ok(count)
}

// ==========================================
// Active session
// ==========================================

/// Load the persisted active session, if any.
pub fn load_active_session(conn: &Connection) -> DatabaseResult<Option<ActiveSession>> {
    let result = conn.query_row(
        "SELECT temp_id, backend_id, note, status, start_time FROM active_session WHERE id = 1",
        [],
        |row| {
            Ok(ActiveSession {
                temp_id: row.get(0)?,
                backend_id: row.get(1)?,
                note: row.get(2)?,
                status: SessionStatus::from_str(&row.get::<_, String>(3)?),
                start_time: parse_datetime(row.get::<_, String>(4)?),
            })
        },
    );

    match result {
        Ok(session) => Ok(Some(session)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert or replace the active session row.
pub fn save_active_session(conn: &Connection, session: &ActiveSession) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO active_session (id, temp_id, backend_id, note, status, start_time)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            temp_id = excluded.temp_id,
            backend_id = excluded.backend_id,
            note = excluded.note,
            status = excluded.status,
            start_time = excluded.start_time",
        params![
            session.temp_id,
            session.backend_id,
            session.note,
            session.status.as_str(),
            session.start_time.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Remove the active session row.
pub fn delete_active_session(conn: &Connection) -> DatabaseResult<bool> {
    let count = conn.execute("DELETE FROM active_session WHERE id = 1", [])?;
    Ok(count > 0)
}

// ==========================================
// Helpers
// ==========================================

/// Row as stored, before the payload is decoded.
struct RawRecord {
    id: i64,
    operation_type: String,
    payload: String,
    enqueued_at: String,
    lifecycle_state: String,
    retry_count: i64,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation_type: row.get(1)?,
            payload: row.get(2)?,
            enqueued_at: row.get(3)?,
            lifecycle_state: row.get(4)?,
            retry_count: row.get(5)?,
        })
    }

    fn into_record(self) -> DatabaseResult<QueueRecord> {
        let operation = Operation::try_from((self.operation_type.as_str(), self.payload.as_str()))?;
        let retry_count = u32::try_from(self.retry_count).map_err(|_| {
            DatabaseError::InvalidData(format!(
                "record {} has invalid retry_count {}",
                self.id, self.retry_count
            ))
        })?;
        Ok(QueueRecord {
            id: self.id,
            operation,
            enqueued_at: parse_datetime(self.enqueued_at),
            lifecycle_state: LifecycleState::from_str(&self.lifecycle_state),
            retry_count,
        })
    }
}

/// Decode rows, skipping any that no longer decode so one bad row cannot
/// wedge the whole queue.
fn decode_records(rows: Vec<RawRecord>) -> Vec<QueueRecord> {
    rows.into_iter()
        .filter_map(|raw| {
            let id = raw.id;
            match raw.into_record() {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(record_id = id, error = %e, "Skipping undecodable outbox record");
                    None
                }
            }
        })
        .collect()
}

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
