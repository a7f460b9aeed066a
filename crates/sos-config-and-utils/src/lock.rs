//! Exclusive sync lock.
//!
//! Only the process holding the lock may drain the outbox or reset records
//! stranded in `Sending`. The lock is a file created with `create_new`
//! holding the owner's PID and removed when the guard drops. A file left by
//! a process that no longer exists is taken over.

use crate::{CoreError, CoreResult};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
    pid: u32,
}

impl SyncLock {
    /// Take the lock at `path`, or fail with [`CoreError::Locked`] while a
    /// live process holds it.
    pub fn acquire(path: &Path) -> CoreResult<Self> {
        match Self::create(path) {
            Err(CoreError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {}
            other => return other,
        }

        let holder = read_pid(path)?;
        match holder {
            Some(pid) if !process_alive(pid) => {
                std::fs::remove_file(path)?;
                Self::create(path).map_err(|e| match e {
                    CoreError::Io(e) if e.kind() == ErrorKind::AlreadyExists => CoreError::Locked {
                        path: path.to_path_buf(),
                        pid: None,
                    },
                    other => other,
                })
            }
            pid => Err(CoreError::Locked {
                path: path.to_path_buf(),
                pid,
            }),
        }
    }

    fn create(path: &Path) -> CoreResult<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let pid = std::process::id();
        file.write_all(pid.to_string().as_bytes())?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// PID recorded in the lock file. `None` when it is missing or half written.
fn read_pid(path: &Path) -> CoreResult<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse::<u32>().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without procfs a recorded holder is assumed to be running.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
