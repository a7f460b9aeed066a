//! Configuration, paths, and logging setup shared by the SOS outbox crates.

mod config;
mod error;
mod lock;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_URL, DEFAULT_AUTHORIZATION_RETRY_CAP, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SYNC_INTERVAL_SECS,
};
pub use error::{CoreError, CoreResult};
pub use lock::SyncLock;
pub use logging::init_logging;
pub use paths::Paths;
