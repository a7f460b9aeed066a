//! Async handle to the outbox database.
//!
//! `tokio_rusqlite` owns the connection on its own thread. Work is sent as a
//! closure and runs in submission order, which is what keeps enqueue ids and
//! state transitions from interleaving. Keep closures to SQL and row
//! mapping; remote calls and listener notification happen outside.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let queued = db.call(|conn| queries::list_by_state(conn, LifecycleState::Queued)).await?;
//! ```

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;
use tracing::info;

/// Durability settings for file-backed stores. An enqueued record must
/// survive a crash as soon as `append` returns.
const FILE_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = FULL;
    PRAGMA busy_timeout = 5000;
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

fn connection_error(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::ConnectionClosed => {
            DatabaseError::Connection("executor thread has shut down".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    location: Location,
}

impl AsyncDatabase {
    /// Open (or create) the store at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.to_path_buf())
            .await
            .map_err(connection_error)?;
        Self::prepare(conn, Location::File(path.to_path_buf())).await
    }

    /// Private store that disappears with the handle.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(connection_error)?;
        Self::prepare(conn, Location::Memory).await
    }

    async fn prepare(conn: Connection, location: Location) -> DatabaseResult<Self> {
        let db = Self { conn, location };
        let durable = matches!(db.location, Location::File(_));

        db.call(move |conn| {
            if durable {
                conn.execute_batch(FILE_PRAGMAS)?;
            }
            migrations::run_migrations(conn)
                .map_err(|e| DatabaseError::Migration(e.to_string()))
        })
        .await?;

        match &db.location {
            Location::File(path) => info!(path = %path.display(), "Outbox store ready"),
            Location::Memory => info!("In-memory outbox store ready"),
        }
        Ok(db)
    }

    /// Run `f` on the database thread and wait for its result.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The typed result rides inside tokio_rusqlite's Ok so it survives the channel.
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(connection_error)?
    }

    /// Backing file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Finish queued work and stop the database thread. Other clones of this
    /// handle fail with [`DatabaseError::Connection`] afterwards.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("close failed: {e}")))?;
        info!("Outbox store closed");
        Ok(())
    }
}
