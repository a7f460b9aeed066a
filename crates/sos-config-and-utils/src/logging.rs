//! Logging initialization for the daemon.
//!
//! All outbox components log through the observability crate, which writes
//! structured JSONL to `~/.sos-outbox/logs/outbox.jsonl`.

use std::path::PathBuf;

/// Service name stamped on every log line.
const SERVICE_NAME: &str = "sos-outboxd";

/// Initialize the logging system for the daemon.
///
/// `level` is the default filter (overridden by `RUST_LOG`). `log_path`
/// replaces the default JSONL location, which is how a custom `--base-dir`
/// keeps its logs next to its database.
///
/// ```ignore
/// init_logging("info", None);
/// tracing::info!("Daemon started");
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>) {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path,
        also_stderr: true, // foreground mode
    });
}
