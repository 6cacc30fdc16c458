//! Per-report exclusive lock.
//!
//! One `LOCK` file per report directory, locked with an OS advisory lock
//! (`flock` semantics via `fs2`). The kernel releases the lock when the
//! holding process dies, so a crash never wedges a report. The holder's PID
//! is stamped into the file purely as a diagnostic for operators inspecting
//! a stuck repository.
//!
//! Acquisition blocks with no internal timeout; a caller that needs one
//! races this call against its own deadline. The guard releases on drop on
//! every exit path.

use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE: &str = "LOCK";

/// RAII guard for a report's exclusive lock.
#[derive(Debug)]
pub struct ReportLock {
    file: std::fs::File,
    path: PathBuf,
}

impl ReportLock {
    /// Block until the lock for `dir` is held.
    pub fn acquire(dir: &Path) -> io::Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        Self::stamp_pid(&file);
        debug!(lock = %path.display(), "acquired report lock");
        Ok(Self { file, path })
    }

    /// Non-blocking variant; `None` when another holder is active.
    pub fn try_acquire(dir: &Path) -> io::Result<Option<Self>> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                Self::stamp_pid(&file);
                Ok(Some(Self { file, path }))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stamp_pid(file: &std::fs::File) {
        // Diagnostic only; a failed stamp must not fail the acquisition.
        let mut f = file;
        let _ = f.set_len(0);
        let _ = writeln!(f, "{}", std::process::id());
        let _ = f.flush();
    }
}

impl Drop for ReportLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            debug!(lock = %self.path.display(), error = %err, "lock release failed");
        }
    }
}
