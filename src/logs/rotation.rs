//! Size-triggered log archival
//!
//! A log at or above `max_bytes` is gzipped into
//! `<name>.<UTC timestamp>.gz` next to it and removed. The archive name is
//! appended to `<name>.index`; only the newest `keep` entries survive and
//! evicted archives are deleted.

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::persist::write_atomic;

/// Rotation thresholds for one log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRotator {
    /// Size at which the live file is archived
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Number of archives retained
    #[serde(default = "default_keep")]
    pub keep: usize,
}

fn default_max_bytes() -> u64 {
    1_000_000
}

fn default_keep() -> usize {
    3
}

impl Default for LogRotator {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            keep: default_keep(),
        }
    }
}

impl LogRotator {
    pub fn new(max_bytes: u64, keep: usize) -> Self {
        Self { max_bytes, keep }
    }

    /// Archive `path` if it has reached `max_bytes`.
    ///
    /// Returns the new archive path, or `None` when nothing was done.
    /// Safe to call before every append.
    pub fn rotate(&self, path: &Path) -> Result<Option<PathBuf>> {
        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if size < self.max_bytes {
            return Ok(None);
        }

        let archive = archive_path(path);
        compress(path, &archive)?;
        fs::remove_file(path)?;

        let name = file_name(&archive);
        let mut entries = read_index(path);
        entries.push(name);
        let evicted = self.prune(path, &mut entries);
        write_index(path, &entries)?;

        info!(
            "Rotated {} ({} bytes) into {}{}",
            path.display(),
            size,
            archive.display(),
            if evicted > 0 {
                format!(", dropped {} old archive(s)", evicted)
            } else {
                String::new()
            }
        );
        Ok(Some(archive))
    }

    /// Remove the oldest entries beyond `keep`, deleting their files.
    fn prune(&self, log: &Path, entries: &mut Vec<String>) -> usize {
        if entries.len() <= self.keep {
            return 0;
        }
        let excess = entries.len() - self.keep;
        for old in entries.drain(..excess) {
            let old_path = sibling(log, &old);
            match fs::remove_file(&old_path) {
                Ok(()) => debug!("Deleted archive {}", old_path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete archive {}: {}", old_path.display(), e),
            }
        }
        excess
    }
}

/// Path of the index file for a log.
pub fn index_path(log: &Path) -> PathBuf {
    sibling(log, &format!("{}.index", file_name(log)))
}

/// Archive paths listed in the index, oldest first.
pub fn archives(log: &Path) -> Vec<PathBuf> {
    read_index(log)
        .into_iter()
        .map(|name| sibling(log, &name))
        .collect()
}

fn read_index(log: &Path) -> Vec<String> {
    fs::read_to_string(index_path(log))
        .map(|raw| {
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn write_index(log: &Path, entries: &[String]) -> Result<()> {
    let mut body = entries.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    write_atomic(&index_path(log), body.as_bytes())
}

fn compress(src: &Path, dest: &Path) -> Result<()> {
    let tmp = dest.with_extension("gz.tmp");
    let result = (|| -> Result<()> {
        let mut reader = BufReader::new(File::open(src)?);
        let mut encoder = GzEncoder::new(File::create(&tmp)?, Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?.sync_all()?;
        fs::rename(&tmp, dest)?;
        Ok(())
    })();
    if result.is_err() {
        fs::remove_file(&tmp).ok();
    }
    result
}

fn archive_path(log: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%6f");
    let base = file_name(log);
    let mut candidate = sibling(log, &format!("{}.{}.gz", base, stamp));
    let mut bump = 1;
    while candidate.exists() {
        candidate = sibling(log, &format!("{}.{}-{}.gz", base, stamp, bump));
        bump += 1;
    }
    candidate
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string())
}

fn sibling(log: &Path, name: &str) -> PathBuf {
    match log.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}
