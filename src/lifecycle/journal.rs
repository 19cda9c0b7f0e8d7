//! Evolution journal: every state-changing step leaves a trace

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::logs::{LogRotator, LogStream};
use crate::persist::write_atomic;

/// Kind of step recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Train,
    Reproduction,
    Mutation,
    Dream,
    Chat,
    Change,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Train => write!(f, "train"),
            StepKind::Reproduction => write!(f, "reproduction"),
            StepKind::Mutation => write!(f, "mutation"),
            StepKind::Dream => write!(f, "dream"),
            StepKind::Chat => write!(f, "chat"),
            StepKind::Change => write!(f, "change"),
        }
    }
}

/// Per-kind step counts, persisted next to the journal.
pub type StepCounts = BTreeMap<String, u64>;

pub struct EvolutionJournal {
    steps: LogStream,
    metrics_path: PathBuf,
    lock: Mutex<()>,
}

impl EvolutionJournal {
    pub fn new(steps_path: impl Into<PathBuf>, metrics_path: impl Into<PathBuf>) -> Self {
        Self {
            steps: LogStream::new(steps_path, LogRotator::default()),
            metrics_path: metrics_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn steps_path(&self) -> &Path {
        self.steps.path()
    }

    /// Append `kind:detail` and bump the kind's counter.
    pub fn record(&self, kind: StepKind, detail: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| EngineError::LockPoisoned("evolution journal"))?;

        self.steps.append(&format!("{}:{}", kind, detail))?;

        let mut counts = self.counts();
        *counts.entry(kind.to_string()).or_insert(0) += 1;
        write_atomic(&self.metrics_path, &serde_json::to_vec_pretty(&counts)?)
    }

    /// Current counts; a missing or corrupt file reads as empty.
    pub fn counts(&self) -> StepCounts {
        let Ok(raw) = std::fs::read(&self.metrics_path) else {
            return StepCounts::new();
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!("Resetting unreadable journal metrics: {}", e);
            StepCounts::new()
        })
    }
}
