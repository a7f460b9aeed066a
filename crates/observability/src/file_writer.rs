//! Append-only JSONL log file and subscriber installation.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn default_log_path() -> io::Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".sos-outbox").join("logs").join("outbox.jsonl"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))
}

/// Shared handle to the log file, opened in append mode.
#[derive(Clone)]
pub struct LogFile {
    file: Arc<Mutex<File>>,
}

impl LogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            file: self.file.clone(),
            line: Vec::with_capacity(256),
        }
    }
}

/// Collects one event and appends it with a single write when dropped, so
/// lines from concurrent writers never interleave.
pub struct LineWriter {
    file: Arc<Mutex<File>>,
    line: Vec<u8>,
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.line.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock();
        file.write_all(&self.line)?;
        self.line.clear();
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the JSONL layer, and the stderr layer when asked, as the global
/// subscriber.
pub fn install(config: &LogConfig) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let path = match &config.log_path {
        Some(path) => path.clone(),
        None => default_log_path()?,
    };

    let json = JsonLayer::new(config.service_name.as_str(), LogFile::open(&path)?)
        .with_filter(filter(&config.default_level));
    let stderr = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(io::stderr)
            .with_filter(filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json)
        .with(stderr)
        .try_init()?;
    Ok(path)
}
