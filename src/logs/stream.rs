//! Append-only line log with rotation and archive search

use chrono::Utc;
use flate2::read::GzDecoder;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::rotation::{archives, LogRotator};
use crate::error::{EngineError, Result};

/// One logical log stream (interaction log, dream log).
///
/// `append` and `rotate` hold the same lock, so a concurrent appender
/// never writes between the archive step and the delete step.
pub struct LogStream {
    path: PathBuf,
    rotator: LogRotator,
    lock: Mutex<()>,
}

impl LogStream {
    pub fn new(path: impl Into<PathBuf>, rotator: LogRotator) -> Self {
        Self {
            path: path.into(),
            rotator,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| EngineError::LockPoisoned("log stream"))
    }

    /// Rotate if needed, then append `line` with a timestamp prefix.
    ///
    /// Embedded newlines are flattened so one call is always one line.
    pub fn append(&self, line: &str) -> Result<()> {
        let _guard = self.guard()?;
        self.rotator.rotate(&self.path)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let flat = line.replace(['\r', '\n'], " ");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {}", Utc::now().to_rfc3339(), flat)?;
        Ok(())
    }

    /// Force a rotation check outside of `append`.
    pub fn rotate(&self) -> Result<Option<PathBuf>> {
        let _guard = self.guard()?;
        self.rotator.rotate(&self.path)
    }

    /// Current size of the live file in bytes.
    pub fn size(&self) -> u64 {
        crate::persist::file_size(&self.path)
    }

    /// Contents of the live file; empty when missing.
    pub fn read_all(&self) -> String {
        fs::read_to_string(&self.path).unwrap_or_default()
    }

    /// Lines containing `needle`, from the live file first, then each
    /// archive in index order.
    pub fn search(&self, needle: &str) -> Result<Vec<String>> {
        let mut hits = Vec::new();

        match File::open(&self.path) {
            Ok(file) => collect_matches(BufReader::new(file), needle, &mut hits),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        for archive in archives(&self.path) {
            match File::open(&archive) {
                Ok(file) => {
                    collect_matches(BufReader::new(GzDecoder::new(file)), needle, &mut hits)
                }
                Err(e) => warn!("Skipping archive {}: {}", archive.display(), e),
            }
        }

        Ok(hits)
    }
}

fn collect_matches<R: BufRead>(reader: R, needle: &str, hits: &mut Vec<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) if line.contains(needle) => hits.push(line),
            Ok(_) => {}
            Err(e) => {
                warn!("Stopped reading log early: {}", e);
                break;
            }
        }
    }
}
