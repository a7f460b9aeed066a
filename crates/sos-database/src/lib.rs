//! SQLite persistence for the SOS outbox.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned migrations for the `outbox` and `active_session` tables
//! - Typed models for queue records and the active-session projection
//! - Query helpers and the `OutboxStore` / `ActiveSessionStore` traits
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let id = db.append(NewQueueRecord::new(operation)).await?;
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
pub use store::{ActiveSessionStore, OutboxStore};
