//! Crash-safe file persistence helpers
//!
//! Every durable snapshot (model, watcher snapshots, state stamps) goes
//! through [`write_atomic`] so a reader never observes a half-written file.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

/// Write `contents` to a sibling temp file, fsync it, then rename over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let written = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = written {
        fs::remove_file(&tmp).ok();
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp, path) {
        fs::remove_file(&tmp).ok();
        return Err(e.into());
    }
    Ok(())
}

/// Size of a file in bytes, 0 when it does not exist.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// A file holding a single timestamp (last reproduction, last activity).
#[derive(Debug, Clone)]
pub struct StampFile {
    path: PathBuf,
}

impl StampFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored timestamp. Missing or unparsable files read as `None`.
    pub fn read(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring unreadable timestamp in {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Overwrite the stamp with `at`.
    pub fn write(&self, at: DateTime<Utc>) -> Result<()> {
        write_atomic(&self.path, at.to_rfc3339().as_bytes())
    }

    /// Overwrite the stamp with the current time.
    pub fn touch(&self) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.write(now)?;
        Ok(now)
    }
}
