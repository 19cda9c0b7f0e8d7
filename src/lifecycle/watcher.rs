//! Snapshot-diff change detection
//!
//! A watcher compares a fresh path -> (size, mtime) snapshot against the
//! one it persisted last time. Any added, removed or modified path moves it
//! to `ChangeDetected`. Detection and commit are separate steps: the new
//! snapshot is persisted and the change logged only when the caller commits,
//! so a failed reaction leaves the change pending for the next poll. The
//! filesystem sits behind [`StorageInspector`] so tests can drive
//! transitions without real file timing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::UNIX_EPOCH;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::logs::{LogRotator, LogStream};
use crate::persist::write_atomic;

/// Size and modification time of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub size: u64,
    pub modified_ms: i64,
}

/// Path -> stamp for every file under the watched targets.
pub type Snapshot = BTreeMap<String, FileStamp>;

/// Port for reading file metadata.
#[cfg_attr(test, mockall::automock)]
pub trait StorageInspector: Send + Sync {
    /// Stamp every file in `targets`; directories are walked recursively.
    /// Missing targets contribute nothing.
    fn snapshot(&self, targets: &[PathBuf]) -> Snapshot;
}

/// Real filesystem inspector
#[derive(Debug, Clone, Copy, Default)]
pub struct FsInspector;

impl StorageInspector for FsInspector {
    fn snapshot(&self, targets: &[PathBuf]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for target in targets {
            for entry in WalkDir::new(target).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                let modified_ms = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                snapshot.insert(
                    entry.path().to_string_lossy().into_owned(),
                    FileStamp {
                        size: meta.len(),
                        modified_ms,
                    },
                );
            }
        }
        snapshot
    }
}

/// Paths that differ between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl SnapshotDiff {
    pub fn between(previous: &Snapshot, current: &Snapshot) -> Self {
        let mut diff = Self::default();
        for (path, stamp) in current {
            match previous.get(path) {
                None => diff.added.push(path.clone()),
                Some(old) if old != stamp => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in previous.keys() {
            if !current.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

impl std::fmt::Display for SnapshotDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "+{} ~{} -{}",
            self.added.len(),
            self.modified.len(),
            self.removed.len()
        )
    }
}

/// Watcher state after a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Unchanged,
    ChangeDetected(SnapshotDiff),
}

impl WatchState {
    pub fn changed(&self) -> bool {
        matches!(self, WatchState::ChangeDetected(_))
    }
}

/// A detected change that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub snapshot: Snapshot,
    pub diff: SnapshotDiff,
}

/// One watched group of paths with its own snapshot and change log.
pub struct ChangeWatcher {
    name: String,
    targets: Vec<PathBuf>,
    snapshot_path: PathBuf,
    change_log: LogStream,
    // Serializes detect + commit in `poll`
    lock: Mutex<()>,
}

impl ChangeWatcher {
    pub fn new(
        name: impl Into<String>,
        targets: Vec<PathBuf>,
        snapshot_path: impl Into<PathBuf>,
        change_log: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            targets,
            snapshot_path: snapshot_path.into(),
            change_log: LogStream::new(change_log, LogRotator::default()),
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn change_log(&self) -> &Path {
        self.change_log.path()
    }

    /// Last persisted snapshot; missing or corrupt files read as empty.
    pub fn stored_snapshot(&self) -> Snapshot {
        let Ok(raw) = std::fs::read(&self.snapshot_path) else {
            return Snapshot::new();
        };
        match serde_json::from_slice(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "Ignoring corrupt {} snapshot {}: {}",
                    self.name,
                    self.snapshot_path.display(),
                    e
                );
                Snapshot::new()
            }
        }
    }

    /// Diff a fresh snapshot against the stored one without persisting anything.
    pub fn detect(&self, inspector: &dyn StorageInspector) -> Option<PendingChange> {
        let current = inspector.snapshot(&self.targets);
        let previous = self.stored_snapshot();
        let diff = SnapshotDiff::between(&previous, &current);
        if diff.is_empty() {
            return None;
        }
        Some(PendingChange {
            snapshot: current,
            diff,
        })
    }

    /// Persist the snapshot of a detected change and log it.
    pub fn commit(&self, pending: &PendingChange) -> Result<()> {
        write_atomic(&self.snapshot_path, &serde_json::to_vec(&pending.snapshot)?)?;
        self.change_log
            .append(&format!("{} changed {}", self.name, pending.diff))?;
        info!("{} watcher detected change ({})", self.name, pending.diff);
        Ok(())
    }

    /// Detect and commit in one step. Concurrent polls of the same watcher
    /// run one at a time, so a change fires exactly once.
    pub fn poll(&self, inspector: &dyn StorageInspector) -> Result<WatchState> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.detect(inspector) {
            None => Ok(WatchState::Unchanged),
            Some(pending) => {
                self.commit(&pending)?;
                Ok(WatchState::ChangeDetected(pending.diff))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn stamp(size: u64, modified_ms: i64) -> FileStamp {
        FileStamp { size, modified_ms }
    }

    fn watcher(dir: &Path) -> ChangeWatcher {
        ChangeWatcher::new(
            "dataset",
            vec![dir.join("datasets")],
            dir.join("dataset_state.json"),
            dir.join("dataset_changes.log"),
        )
    }

    #[test]
    fn test_diff_classifies_paths() {
        let previous = Snapshot::from([
            ("a".to_string(), stamp(1, 1)),
            ("b".to_string(), stamp(2, 2)),
        ]);
        let current = Snapshot::from([
            ("a".to_string(), stamp(1, 1)),
            ("b".to_string(), stamp(3, 2)),
            ("c".to_string(), stamp(1, 1)),
        ]);
        let diff = SnapshotDiff::between(&previous, &current);
        assert_eq!(diff.added, vec!["c"]);
        assert_eq!(diff.modified, vec!["b"]);
        assert!(diff.removed.is_empty());

        let diff = SnapshotDiff::between(&current, &previous);
        assert_eq!(diff.removed, vec!["c"]);
    }

    #[test]
    fn test_fires_once_per_distinct_snapshot() {
        let dir = tempdir().unwrap();
        let watcher = watcher(dir.path());

        let first = Snapshot::from([("datasets/a.md".to_string(), stamp(10, 100))]);
        let second = Snapshot::from([("datasets/a.md".to_string(), stamp(12, 200))]);

        let mut inspector = MockStorageInspector::new();
        let mut seq = mockall::Sequence::new();
        for snap in [first.clone(), first, second.clone(), second] {
            inspector
                .expect_snapshot()
                .times(1)
                .in_sequence(&mut seq)
                .return_const(snap);
        }

        assert!(watcher.poll(&inspector).unwrap().changed());
        assert_eq!(watcher.poll(&inspector).unwrap(), WatchState::Unchanged);
        match watcher.poll(&inspector).unwrap() {
            WatchState::ChangeDetected(diff) => assert_eq!(diff.modified, vec!["datasets/a.md"]),
            other => panic!("expected change, got {:?}", other),
        }
        assert_eq!(watcher.poll(&inspector).unwrap(), WatchState::Unchanged);

        let log = fs::read_to_string(watcher.change_log()).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().all(|l| l.contains("dataset changed")));
    }

    #[test]
    fn test_corrupt_snapshot_reads_empty() {
        let dir = tempdir().unwrap();
        let watcher = watcher(dir.path());
        fs::write(dir.path().join("dataset_state.json"), "not json").unwrap();
        assert!(watcher.stored_snapshot().is_empty());
    }

    #[test]
    fn test_empty_targets_stay_unchanged() {
        let dir = tempdir().unwrap();
        let watcher = watcher(dir.path());
        assert_eq!(watcher.poll(&FsInspector).unwrap(), WatchState::Unchanged);
    }

    #[test]
    fn test_fs_inspector_walks_dirs_and_files() {
        let dir = tempdir().unwrap();
        let datasets = dir.path().join("datasets");
        fs::create_dir_all(datasets.join("nested")).unwrap();
        fs::write(datasets.join("a.md"), "abc").unwrap();
        fs::write(datasets.join("nested").join("b.md"), "de").unwrap();
        fs::write(dir.path().join("README.md"), "x").unwrap();

        let snapshot = FsInspector.snapshot(&[
            datasets.clone(),
            dir.path().join("README.md"),
            dir.path().join("missing.md"),
        ]);
        assert_eq!(snapshot.len(), 3);
        let key = datasets.join("a.md").to_string_lossy().into_owned();
        assert_eq!(snapshot[&key].size, 3);
    }

    #[test]
    fn test_removal_is_a_change() {
        let dir = tempdir().unwrap();
        let datasets = dir.path().join("datasets");
        fs::create_dir_all(&datasets).unwrap();
        fs::write(datasets.join("a.md"), "abc").unwrap();

        let watcher = watcher(dir.path());
        assert!(watcher.poll(&FsInspector).unwrap().changed());
        fs::remove_file(datasets.join("a.md")).unwrap();
        match watcher.poll(&FsInspector).unwrap() {
            WatchState::ChangeDetected(diff) => assert_eq!(diff.removed.len(), 1),
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_detect_leaves_change_pending_until_commit() {
        let dir = tempdir().unwrap();
        let datasets = dir.path().join("datasets");
        fs::create_dir_all(&datasets).unwrap();
        fs::write(datasets.join("a.md"), "abc").unwrap();
        let watcher = watcher(dir.path());

        let pending = watcher.detect(&FsInspector).unwrap();
        assert_eq!(pending.diff.added.len(), 1);
        // Nothing committed: the same change is still there
        assert!(watcher.stored_snapshot().is_empty());
        assert!(!watcher.change_log().exists());
        assert_eq!(watcher.detect(&FsInspector), Some(pending.clone()));

        watcher.commit(&pending).unwrap();
        assert_eq!(watcher.detect(&FsInspector), None);
        let log = fs::read_to_string(watcher.change_log()).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    struct SlowInspector;

    impl StorageInspector for SlowInspector {
        fn snapshot(&self, _targets: &[PathBuf]) -> Snapshot {
            thread::sleep(Duration::from_millis(50));
            Snapshot::from([("datasets/a.md".to_string(), stamp(1, 1))])
        }
    }

    #[test]
    fn test_concurrent_polls_fire_once() {
        let dir = tempdir().unwrap();
        let watcher = Arc::new(watcher(dir.path()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let watcher = Arc::clone(&watcher);
                thread::spawn(move || watcher.poll(&SlowInspector).unwrap().changed())
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&changed| changed)
            .count();

        assert_eq!(fired, 1);
        let log = fs::read_to_string(watcher.change_log()).unwrap();
        assert_eq!(log.lines().count(), 1);
    }
}
