//! Append-only run log and its polling reader.
//!
//! The orchestrator is the only writer; the caller observes progress by
//! polling the same file for newly appended text. One writer, one reader,
//! append-only, so no locking is needed. The log file is a transient
//! artifact named after the run id and is removed by the caller after the
//! final flush.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

/// Append-only text log for one run.
#[derive(Debug)]
pub struct RunLog {
    file: File,
    path: PathBuf,
}

impl RunLog {
    /// Create (or truncate) the log file at `base_dir`, named by run id.
    pub fn create(base_dir: &Path, run_id: &str) -> Result<Self> {
        let path = base_dir.join(format!("wimswap-{run_id}.log"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("creating run log '{}'", path.display()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line and flush it so the streamer sees it on
    /// the next poll.
    pub fn line(&mut self, text: &str) {
        let stamp = OffsetDateTime::now_utc()
            .format(TIMESTAMP_FORMAT)
            .unwrap_or_default();
        // The log is best-effort; a failed write must not abort the run.
        let _ = writeln!(self.file, "[{stamp}] {text}");
        let _ = self.file.flush();
    }
}

/// Incremental reader over a [`RunLog`] file.
///
/// The open handle keeps its own read position, so each poll returns only
/// text appended since the previous one. Transient empty or failed reads
/// yield `None` and are retried on the next poll.
#[derive(Debug)]
pub struct LogStreamer {
    file: File,
}

impl LogStreamer {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening run log '{}'", path.display()))?;
        Ok(Self { file })
    }

    /// Read whatever has been appended since the last poll.
    pub fn poll(&mut self) -> Option<String> {
        let mut buf = String::new();
        match self.file.read_to_string(&mut buf) {
            Ok(0) => None,
            Ok(_) => Some(buf),
            Err(_) => None,
        }
    }

    /// Final flush read; consumes the streamer so the handle is released
    /// exactly once.
    pub fn finish(mut self) -> Option<String> {
        self.poll()
    }
}
