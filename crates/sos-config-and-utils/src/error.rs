//! Errors raised while resolving paths and loading configuration.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting holds a value the engine cannot run with.
    #[error("Invalid setting `{key}`: {reason}")]
    Config { key: &'static str, reason: String },

    /// The config file exists but is not valid JSON for [`crate::Config`].
    #[error("Malformed config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another process holds the sync lock.
    #[error("Sync lock {} is held by {}", path.display(), lock_holder(pid))]
    Locked { path: PathBuf, pid: Option<u32> },

    /// Home directory could not be determined.
    #[error("Path error: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

fn lock_holder(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!("process {pid}"),
        None => "another process".to_string(),
    }
}
