//! Remote session service contract and failure classification.

use async_trait::async_trait;
use sos_database::ReportPayload;
use thiserror::Error;

/// Error bodies from the session service that mean the caller is not signed in.
const AUTHORIZATION_MARKERS: &[&str] = &["Unauthorized", "Only users"];

/// How the drain loop treats a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Identity missing or rejected. Retried without ever exhausting the record.
    AuthorizationRequired,
    /// Anything else. Counts toward the delivery attempt limit.
    Transient,
}

/// Remote dispatch error.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Authorization required: {0}")]
    AuthorizationRequired(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    /// Transport-level failure from reqwest (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A dependent operation still names a session by its local id and the
    /// server id is not known yet.
    #[error("Session {0} has no server id yet")]
    UnresolvedSession(i64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::AuthorizationRequired(_) => FailureClass::AuthorizationRequired,
            _ => FailureClass::Transient,
        }
    }

    /// Classify an error status and body returned by the service.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {body}");
        if status == 401 || status == 403 || mentions_authorization(body) {
            Self::AuthorizationRequired(message)
        } else {
            Self::Transient(message)
        }
    }
}

/// Whether an error message reports a missing or rejected identity.
pub fn mentions_authorization(message: &str) -> bool {
    AUTHORIZATION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Result type alias using RemoteError.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations the drain loop replays against the remote service.
///
/// Session ids here are always server-assigned.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Open a session and return its server id.
    async fn create_session(&self, note: &str) -> RemoteResult<i64>;

    async fn close_session(&self, session_id: i64) -> RemoteResult<()>;

    async fn append_location_sample(
        &self,
        session_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> RemoteResult<()>;

    /// Submit a report and return its server id.
    async fn submit_report(&self, report: &ReportPayload) -> RemoteResult<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_and_403_require_authorization() {
        assert_eq!(
            RemoteError::from_status(401, "").class(),
            FailureClass::AuthorizationRequired
        );
        assert_eq!(
            RemoteError::from_status(403, "forbidden").class(),
            FailureClass::AuthorizationRequired
        );
    }

    #[test]
    fn authorization_markers_in_body() {
        let err = RemoteError::from_status(500, "Only users can start a session");
        assert_eq!(err.class(), FailureClass::AuthorizationRequired);

        let err = RemoteError::from_status(400, "Unauthorized caller");
        assert_eq!(err.class(), FailureClass::AuthorizationRequired);
    }

    #[test]
    fn other_failures_are_transient() {
        assert_eq!(
            RemoteError::from_status(503, "upstream down").class(),
            FailureClass::Transient
        );
        assert_eq!(RemoteError::UnresolvedSession(1).class(), FailureClass::Transient);
        assert_eq!(
            RemoteError::InvalidResponse("no id".into()).class(),
            FailureClass::Transient
        );
    }

    #[test]
    fn error_display() {
        let err = RemoteError::from_status(502, "bad gateway");
        assert_eq!(err.to_string(), "Transient failure: HTTP 502: bad gateway");
        assert_eq!(
            RemoteError::UnresolvedSession(7).to_string(),
            "Session 7 has no server id yet"
        );
    }
}
