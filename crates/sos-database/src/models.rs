//! Database model types.

use crate::{DatabaseError, DatabaseResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of remote operation a queue record replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CreateSession,
    CloseSession,
    AppendLocationSample,
    SubmitReport,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSession => "create_session",
            Self::CloseSession => "close_session",
            Self::AppendLocationSample => "append_location_sample",
            Self::SubmitReport => "submit_report",
        }
    }

    /// Unlike the state enums there is no sensible fallback here: an unknown
    /// operation type cannot be dispatched.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create_session" => Some(Self::CreateSession),
            "close_session" => Some(Self::CloseSession),
            "append_location_sample" => Some(Self::AppendLocationSample),
            "submit_report" => Some(Self::SubmitReport),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a queue record.
///
/// Delivered records are deleted, so there is no "sent" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Queued,
    Sending,
    Failed,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Queued
    }
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sending" => Self::Sending,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

/// Reference to a session from a dependent operation.
///
/// `Local` carries the id of the CreateSession record that will create the
/// session; `Remote` carries the identifier the server assigned to it.
///
/// Serialized as `{"local": 1}` or `{"remote": 42}`. A bare integer is read
/// as a local reference, the form callers use before a session has synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "SessionRefInput")]
pub enum SessionRef {
    Local(i64),
    Remote(i64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SessionRefInput {
    Bare(i64),
    Tagged(TaggedSessionRef),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaggedSessionRef {
    Local(i64),
    Remote(i64),
}

impl From<SessionRefInput> for SessionRef {
    fn from(input: SessionRefInput) -> Self {
        match input {
            SessionRefInput::Bare(id) | SessionRefInput::Tagged(TaggedSessionRef::Local(id)) => {
                Self::Local(id)
            }
            SessionRefInput::Tagged(TaggedSessionRef::Remote(id)) => Self::Remote(id),
        }
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{id}"),
            Self::Remote(id) => write!(f, "remote:{id}"),
        }
    }
}

/// Report severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// A position fix attached to a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReading {
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionPayload {
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseSessionPayload {
    pub session_id: SessionRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSamplePayload {
    pub session_id: SessionRef,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub category: String,
    pub severity: Severity,
    pub description: String,
    pub location: LocationReading,
}

/// A buffered remote action with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateSession(CreateSessionPayload),
    CloseSession(CloseSessionPayload),
    AppendLocationSample(LocationSamplePayload),
    SubmitReport(ReportPayload),
}

impl Operation {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::CreateSession(_) => OperationType::CreateSession,
            Self::CloseSession(_) => OperationType::CloseSession,
            Self::AppendLocationSample(_) => OperationType::AppendLocationSample,
            Self::SubmitReport(_) => OperationType::SubmitReport,
        }
    }

    /// Serialize the payload alone; the type lives in its own column.
    pub fn payload_json(&self) -> DatabaseResult<Value> {
        let value = match self {
            Self::CreateSession(p) => serde_json::to_value(p)?,
            Self::CloseSession(p) => serde_json::to_value(p)?,
            Self::AppendLocationSample(p) => serde_json::to_value(p)?,
            Self::SubmitReport(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Decode a payload for the given type. Fails when required fields are
    /// missing or have the wrong shape.
    pub fn from_parts(operation_type: OperationType, payload: Value) -> DatabaseResult<Self> {
        let operation = match operation_type {
            OperationType::CreateSession => Self::CreateSession(serde_json::from_value(payload)?),
            OperationType::CloseSession => Self::CloseSession(serde_json::from_value(payload)?),
            OperationType::AppendLocationSample => {
                Self::AppendLocationSample(serde_json::from_value(payload)?)
            }
            OperationType::SubmitReport => Self::SubmitReport(serde_json::from_value(payload)?),
        };
        Ok(operation)
    }

    /// The session this operation depends on, if any.
    pub fn session_ref(&self) -> Option<SessionRef> {
        match self {
            Self::CloseSession(p) => Some(p.session_id),
            Self::AppendLocationSample(p) => Some(p.session_id),
            Self::CreateSession(_) | Self::SubmitReport(_) => None,
        }
    }

    /// Range and content checks that the JSON shape alone cannot express.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::CreateSession(_) | Self::CloseSession(_) => Ok(()),
            Self::AppendLocationSample(p) => validate_coordinates(p.latitude, p.longitude),
            Self::SubmitReport(p) => {
                if p.category.trim().is_empty() {
                    return Err("report category must not be blank".to_string());
                }
                if p.description.trim().is_empty() {
                    return Err("report description must not be blank".to_string());
                }
                validate_coordinates(p.location.latitude, p.location.longitude)
            }
        }
    }
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), String> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {latitude} out of range"));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {longitude} out of range"));
    }
    Ok(())
}

/// Outbox queue record.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRecord {
    pub id: i64,
    pub operation: Operation,
    pub enqueued_at: DateTime<Utc>,
    pub lifecycle_state: LifecycleState,
    pub retry_count: u32,
}

/// Input for appending a record. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewQueueRecord {
    pub operation: Operation,
    pub enqueued_at: DateTime<Utc>,
}

impl NewQueueRecord {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            enqueued_at: Utc::now(),
        }
    }
}

/// Local status of the session the user is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Queued,
    Syncing,
    Active,
    Ending,
    Ended,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Syncing => "syncing",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Ended => "ended",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "syncing" => Self::Syncing,
            "active" => Self::Active,
            "ending" => Self::Ending,
            "ended" => Self::Ended,
            _ => Self::Queued,
        }
    }
}

/// Projection of the one session the client is running.
///
/// `temp_id` is the id of the CreateSession record that started it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub temp_id: i64,
    pub backend_id: Option<i64>,
    pub note: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
}

impl ActiveSession {
    pub fn new(temp_id: i64, note: impl Into<String>) -> Self {
        Self {
            temp_id,
            backend_id: None,
            note: note.into(),
            status: SessionStatus::Queued,
            start_time: Utc::now(),
        }
    }

    /// Best reference for new dependent operations.
    pub fn session_ref(&self) -> SessionRef {
        match self.backend_id {
            Some(id) => SessionRef::Remote(id),
            None => SessionRef::Local(self.temp_id),
        }
    }

    /// Whether `session` names this session by either of its identifiers.
    pub fn matches(&self, session: &SessionRef) -> bool {
        match session {
            SessionRef::Local(id) => *id == self.temp_id,
            SessionRef::Remote(id) => self.backend_id == Some(*id),
        }
    }
}

impl TryFrom<(&str, &str)> for Operation {
    type Error = DatabaseError;

    /// Decode `(operation_type, payload_json)` as stored in the outbox table.
    fn try_from((operation_type, payload): (&str, &str)) -> DatabaseResult<Self> {
        let operation_type = OperationType::from_str(operation_type).ok_or_else(|| {
            DatabaseError::InvalidData(format!("unknown operation type: {operation_type}"))
        })?;
        let payload: Value = serde_json::from_str(payload)?;
        Self::from_parts(operation_type, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_state_from_str() {
        assert_eq!(LifecycleState::from_str("queued"), LifecycleState::Queued);
        assert_eq!(LifecycleState::from_str("SENDING"), LifecycleState::Sending);
        assert_eq!(LifecycleState::from_str("failed"), LifecycleState::Failed);
        // Unknown defaults to Queued
        assert_eq!(LifecycleState::from_str("sent"), LifecycleState::Queued);
        assert_eq!(LifecycleState::from_str(""), LifecycleState::Queued);
    }

    #[test]
    fn test_session_status_from_str() {
        assert_eq!(SessionStatus::from_str("active"), SessionStatus::Active);
        assert_eq!(SessionStatus::from_str("Ending"), SessionStatus::Ending);
        assert_eq!(SessionStatus::from_str("bogus"), SessionStatus::Queued);
        assert_eq!(SessionStatus::default(), SessionStatus::Queued);
    }

    #[test]
    fn test_operation_type_from_str_rejects_unknown() {
        assert_eq!(
            OperationType::from_str("append_location_sample"),
            Some(OperationType::AppendLocationSample)
        );
        assert_eq!(OperationType::from_str("startSOS"), None);
    }

    #[test]
    fn test_session_ref_json_shape() {
        let local = serde_json::to_value(SessionRef::Local(1)).unwrap();
        assert_eq!(local, json!({ "local": 1 }));
        let remote: SessionRef = serde_json::from_value(json!({ "remote": 42 })).unwrap();
        assert_eq!(remote, SessionRef::Remote(42));
        assert_eq!(remote.to_string(), "remote:42");
    }

    #[test]
    fn test_bare_session_id_reads_as_local() {
        let bare: SessionRef = serde_json::from_value(json!(1)).unwrap();
        assert_eq!(bare, SessionRef::Local(1));
        assert_eq!(serde_json::to_value(bare).unwrap(), json!({ "local": 1 }));

        let op = Operation::from_parts(
            OperationType::CloseSession,
            json!({ "session_id": 7 }),
        )
        .unwrap();
        assert_eq!(op.session_ref(), Some(SessionRef::Local(7)));

        assert!(serde_json::from_value::<SessionRef>(json!("7")).is_err());
        assert!(serde_json::from_value::<SessionRef>(json!({ "server": 7 })).is_err());
    }

    #[test]
    fn test_create_session_requires_note() {
        let err = Operation::from_parts(OperationType::CreateSession, json!({}));
        assert!(err.is_err());

        let op = Operation::from_parts(OperationType::CreateSession, json!({ "note": "help" }))
            .unwrap();
        assert_eq!(
            op,
            Operation::CreateSession(CreateSessionPayload {
                note: "help".to_string()
            })
        );
    }

    #[test]
    fn test_location_sample_requires_numeric_coordinates() {
        let bad = Operation::from_parts(
            OperationType::AppendLocationSample,
            json!({ "session_id": { "local": 1 }, "latitude": "north", "longitude": 20.0 }),
        );
        assert!(bad.is_err());

        let missing_session = Operation::from_parts(
            OperationType::AppendLocationSample,
            json!({ "latitude": 10.0, "longitude": 20.0 }),
        );
        assert!(missing_session.is_err());
    }

    #[test]
    fn test_validate_coordinate_ranges() {
        let sample = |latitude, longitude| {
            Operation::AppendLocationSample(LocationSamplePayload {
                session_id: SessionRef::Local(1),
                latitude,
                longitude,
            })
        };
        assert!(sample(10.0, 20.0).validate().is_ok());
        assert!(sample(90.0, -180.0).validate().is_ok());
        assert!(sample(90.5, 0.0).validate().is_err());
        assert!(sample(0.0, 181.0).validate().is_err());
        assert!(sample(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn test_validate_report_text() {
        let report = Operation::SubmitReport(ReportPayload {
            category: "  ".to_string(),
            severity: Severity::High,
            description: "oil on road".to_string(),
            location: LocationReading {
                latitude: 1.0,
                longitude: 2.0,
                recorded_at: Utc::now(),
            },
        });
        assert!(report.validate().is_err());
    }

    #[test]
    fn test_active_session_matches_either_id() {
        let mut session = ActiveSession::new(1, "help");
        assert_eq!(session.session_ref(), SessionRef::Local(1));
        assert!(session.matches(&SessionRef::Local(1)));
        assert!(!session.matches(&SessionRef::Remote(1)));

        session.backend_id = Some(42);
        assert_eq!(session.session_ref(), SessionRef::Remote(42));
        assert!(session.matches(&SessionRef::Local(1)));
        assert!(session.matches(&SessionRef::Remote(42)));
        assert!(!session.matches(&SessionRef::Remote(43)));
    }

    #[test]
    fn test_operation_try_from_stored_columns() {
        let op = Operation::try_from((
            "close_session",
            r#"{"session_id":{"remote":42}}"#,
        ))
        .unwrap();
        assert_eq!(op.session_ref(), Some(SessionRef::Remote(42)));

        let unknown = Operation::try_from(("launch_rocket", "{}"));
        assert!(matches!(unknown, Err(DatabaseError::InvalidData(_))));
    }
}
