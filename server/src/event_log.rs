//! Append-only, human-readable server event log.
//!
//! This is the persisted `server_log.txt` sink, separate from the `log`
//! crate's stderr diagnostics. Writes are serialized through a mutex and
//! every entry carries a wall-clock timestamp. A failed write must never
//! take a session down, so errors are demoted to stderr diagnostics.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use log::warn;

/// Mutex-serialized append log with wall-clock timestamps.
pub struct EventLog {
    sink: Mutex<BufWriter<File>>,
}

impl EventLog {
    /// Opens the log file in append mode, creating it if needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Appends one timestamped line.
    pub fn record(&self, message: &str) {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(sink, "{timestamp} {message}") {
            warn!("event log write failed: {e}");
        }
    }

    /// Flushes buffered entries to disk.
    pub fn flush(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = sink.flush() {
            warn!("event log flush failed: {e}");
        }
    }
}
