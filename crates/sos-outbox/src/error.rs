//! Outbox error types.

use crate::RemoteError;
use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Durable store failure
    #[error("Database error: {0}")]
    Database(#[from] sos_database::DatabaseError),

    /// Remote service failure surfaced outside the drain loop
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Payload rejected before it reached the store
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
