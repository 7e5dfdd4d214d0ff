//! Activity Log
//!
//! Append-only buffer of timestamped, human-readable events. Entries stay in
//! memory until the operator flushes them to the log file.

use crate::utils::error::Result;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Buffered operator-facing event log
pub struct ActivityLog {
    path: PathBuf,
    buffer: Mutex<Vec<String>>,
}

impl ActivityLog {
    /// Create an empty log that flushes into `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Append one event, stamped with the local time
    pub fn record<S: AsRef<str>>(&self, event: S) {
        let line = format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S%.6f"), event.as_ref());
        debug!("activity: {}", line);
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    /// Number of entries waiting for the next flush
    pub fn pending(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Copy of the buffered entries, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Path of the durable log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append every buffered entry to the log file and clear the buffer.
    ///
    /// The buffer is left untouched if the file cannot be written.
    ///
    /// # Returns
    /// * `Result<usize>` - The number of entries written
    pub fn flush(&self) -> Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.is_empty() {
            return Ok(0);
        }

        let mut text = buffer.join("\n");
        text.push('\n');

        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        file.write_all(text.as_bytes())?;
        file.flush()?;

        let written = buffer.len();
        buffer.clear();
        debug!("flushed {} activity entries to {}", written, self.path.display());
        Ok(written)
    }
}
