//! Logging setup shared by the SOS outbox binaries.
//!
//! Call [`init_with_config`] once at startup, then log with the `tracing`
//! macros. Events go to an append-only JSONL file (see [`JsonLayer`] for the
//! line format) and, optionally, to a compact stderr layer.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "sos-outboxd".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

pub use file_writer::{LineWriter, LogFile};
pub use json_layer::{JsonLayer, LogEntry};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written as `service` on every line.
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset.
    pub default_level: String,
    /// Defaults to `~/.sos-outbox/logs/outbox.jsonl`.
    pub log_path: Option<PathBuf>,
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "sos-outbox".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Install the global subscriber.
///
/// When the log file cannot be opened this falls back to stderr only.
/// Returns quietly if a subscriber is already installed.
pub fn init_with_config(config: LogConfig) {
    match file_writer::install(&config) {
        Ok(path) => tracing::debug!(
            log_path = %path.display(),
            service = %config.service_name,
            "Logging initialized"
        ),
        Err(e) => {
            let fallback = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
                )
                .compact()
                .with_writer(std::io::stderr)
                .try_init();
            if fallback.is_ok() {
                tracing::warn!(error = %e, "Log file unavailable, logging to stderr only");
            }
        }
    }
}
