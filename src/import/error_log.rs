//! Per-file error buffering and the JSON Lines error sink.
//!
//! An [`ErrorCollector`] lives for exactly one file's processing: created at
//! file start, appended to while the file runs, and consumed by a single
//! `flush` at the file boundary. Flushing takes the collector by value, so a
//! second flush for the same file cannot be written at all.

use crate::models::ErrorEntry;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only buffer of structured error entries for one file.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    entries: Vec<ErrorEntry>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: ErrorEntry) {
        log::debug!(
            "error recorded: file={} sheet={} row={} kind={}",
            entry.file,
            entry.sheet,
            entry.row,
            entry.kind.as_str()
        );
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every buffered entry as one JSON line and return the count.
    /// Consumes the collector; an empty buffer writes nothing and does not
    /// create the log file.
    pub fn flush(self, sink: &mut ErrorSink) -> io::Result<usize> {
        if self.entries.is_empty() {
            return Ok(0);
        }
        let count = self.entries.len();
        for entry in &self.entries {
            sink.write_entry(entry)?;
        }
        sink.sync()?;
        Ok(count)
    }
}

/// Line-delimited error log shared by all files of one run. The backing
/// file `errors-YYYYMMDD-HHMMSS.log` (UTC stamp) is created lazily on the
/// first write, so clean runs leave no empty log behind.
#[derive(Debug)]
pub struct ErrorSink {
    dir: PathBuf,
    open: Option<(PathBuf, File)>,
}

impl ErrorSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: None,
        }
    }

    /// Path of the log file, once something has been written.
    pub fn path(&self) -> Option<&Path> {
        self.open.as_ref().map(|(path, _)| path.as_path())
    }

    fn write_entry(&mut self, entry: &ErrorEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry).map_err(io::Error::from)?;
        let file = self.file()?;
        writeln!(file, "{line}")
    }

    fn sync(&mut self) -> io::Result<()> {
        match &mut self.open {
            Some((_, file)) => file.flush(),
            None => Ok(()),
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.open.is_none() {
            std::fs::create_dir_all(&self.dir)?;
            let stamp = Utc::now().format("%Y%m%d-%H%M%S");
            let path = self.dir.join(format!("errors-{stamp}.log"));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.open = Some((path, file));
        }
        Ok(&mut self.open.as_mut().expect("sink file just opened").1)
    }
}
