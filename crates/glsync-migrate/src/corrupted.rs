//! Append-only record of projects that could not be transferred.
//!
//! Every line carries enough identity (project id and name, or repository
//! URL) to re-drive the item by hand after the run.

use crate::error::Result;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Sink for corrupted-item records.
pub struct CorruptedLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl CorruptedLog {
    /// Open (or create) the log file in append mode and write a run separator.
    pub fn open(path: impl AsRef<Path>, started_at: DateTime<Local>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let log = Self::from_writer(Box::new(file));
        log.separator(started_at);
        Ok(log)
    }

    /// Wrap an arbitrary writer.
    pub fn from_writer(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// A log that drops every record.
    pub fn disabled() -> Self {
        Self::from_writer(Box::new(std::io::sink()))
    }

    fn separator(&self, started_at: DateTime<Local>) {
        self.write_line(&format!("------------ {started_at} ------------"));
    }

    /// A project whose export never started.
    pub fn project(&self, project_id: u64, name: &str) {
        self.write_line(&format!("Project corrupted: {project_id};{name}"));
    }

    /// A repository that could not be mirror-cloned.
    pub fn clone_failed(&self, url: &str) {
        self.write_line(&format!("Cloning corrupted, URL: {url}"));
    }

    /// A repository whose LFS objects could not be fetched.
    pub fn lfs_failed(&self, url: &str) {
        self.write_line(&format!("LFS corrupted, URL: {url}"));
    }

    fn write_line(&self, line: &str) {
        let stamp = Local::now().format("%Y/%m/%d %H:%M:%S");
        let mut sink = self.sink.lock();
        if let Err(e) = writeln!(sink, "{stamp} CORRUPTED: {line}").and_then(|()| sink.flush()) {
            warn!(error = %e, record = line, "Failed to write corrupted-item record");
        }
    }
}
