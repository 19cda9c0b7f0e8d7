//! Character n-gram model
//!
//! Provides:
//! - `NgramModel`: context (n-1 chars) -> next char -> count
//! - Versioned on-disk codec with legacy fallback
//! - Trainer with adaptive `n` and long-tail pruning
//! - Generator with context backoff and an injectable sampler

pub mod codec;
pub mod generator;
pub mod trainer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use codec::Decoded;
pub use generator::{generate, generate_with, GenerateOptions, GreedySampler, RngSampler, Sampler};
pub use trainer::{Trainer, TrainerConfig};

use crate::error::Result;

/// Smallest supported n-gram order.
pub const MIN_N: usize = 2;

/// Next-character frequency table for one context.
pub type Transitions = BTreeMap<char, u64>;

/// A trained character n-gram model.
///
/// Every context key is exactly `n - 1` characters and every count is at
/// least 1. Keys are kept ordered so that index-based sampling is
/// reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgramModel {
    n: usize,
    table: BTreeMap<String, Transitions>,
}

impl NgramModel {
    /// Create an empty model of order `n` (clamped to at least 2).
    pub fn new(n: usize) -> Self {
        Self {
            n: n.max(MIN_N),
            table: BTreeMap::new(),
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Length of every context key, in characters.
    pub fn context_len(&self) -> usize {
        self.n - 1
    }

    pub fn table(&self) -> &BTreeMap<String, Transitions> {
        &self.table
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of distinct contexts, used as a coarse size metric.
    pub fn context_count(&self) -> usize {
        self.table.len()
    }

    pub fn transitions(&self, context: &str) -> Option<&Transitions> {
        self.table.get(context)
    }

    pub fn contains_context(&self, context: &str) -> bool {
        self.table.contains_key(context)
    }

    /// The `index`-th context in key order.
    pub fn context_at(&self, index: usize) -> Option<&str> {
        self.table.keys().nth(index).map(String::as_str)
    }

    pub fn count(&self, context: &str, next: char) -> Option<u64> {
        self.table.get(context).and_then(|t| t.get(&next)).copied()
    }

    /// Record one observation of `next` following `context`.
    ///
    /// Contexts of the wrong length are ignored to keep the invariant.
    pub fn observe(&mut self, context: &str, next: char) {
        if context.chars().count() != self.context_len() {
            return;
        }
        *self
            .table
            .entry(context.to_string())
            .or_default()
            .entry(next)
            .or_insert(0) += 1;
    }

    /// Overwrite an existing transition count, floored at 1.
    ///
    /// Returns the previous count, or `None` if the transition does not exist.
    pub fn set_count(&mut self, context: &str, next: char, count: u64) -> Option<u64> {
        let slot = self.table.get_mut(context)?.get_mut(&next)?;
        let previous = *slot;
        *slot = count.max(1);
        Some(previous)
    }

    /// Add 1 to every existing transition whose next char is in `chars`,
    /// across all contexts. Returns how many counts changed.
    pub fn boost_chars(&mut self, chars: &std::collections::BTreeSet<char>) -> usize {
        let mut boosted = 0;
        for transitions in self.table.values_mut() {
            for (next, count) in transitions.iter_mut() {
                if chars.contains(next) {
                    *count += 1;
                    boosted += 1;
                }
            }
        }
        boosted
    }

    /// Keep only contexts for which `keep` returns true.
    pub fn retain_contexts<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &Transitions) -> bool,
    {
        self.table.retain(|ctx, transitions| keep(ctx, transitions));
    }

    /// Smallest transition count anywhere in the model.
    pub fn min_count(&self) -> Option<u64> {
        self.table.values().flat_map(|t| t.values()).copied().min()
    }

    pub(crate) fn from_table(n: usize, table: BTreeMap<String, Transitions>) -> Self {
        Self { n: n.max(MIN_N), table }
    }
}

/// Owns the persisted model snapshot on disk.
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the persisted model.
    ///
    /// Legacy formats are migrated in place. Missing or unreadable files
    /// yield `None` and the caller is expected to retrain.
    pub fn load(&self) -> Option<NgramModel> {
        let bytes = std::fs::read(&self.path).ok()?;
        match codec::decode(&bytes) {
            Decoded::Current(model) => Some(model),
            Decoded::Legacy(model) => {
                info!("Migrating legacy model file {}", self.path.display());
                if let Err(e) = self.save(&model) {
                    warn!("Failed to re-save migrated model: {}", e);
                }
                Some(model)
            }
            Decoded::Unreadable => {
                warn!("Model file {} is unreadable; retraining required", self.path.display());
                None
            }
        }
    }

    /// Persist the full snapshot, replacing any prior file atomically.
    pub fn save(&self, model: &NgramModel) -> Result<()> {
        let encoded = codec::encode(model)?;
        crate::persist::write_atomic(&self.path, encoded.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_respects_context_length() {
        let mut model = NgramModel::new(3);
        model.observe("ab", 'c');
        model.observe("ab", 'c');
        model.observe("a", 'x');
        assert_eq!(model.count("ab", 'c'), Some(2));
        assert!(!model.contains_context("a"));
        assert_eq!(model.context_count(), 1);
    }

    #[test]
    fn test_new_clamps_order() {
        assert_eq!(NgramModel::new(0).n(), 2);
        assert_eq!(NgramModel::new(1).context_len(), 1);
    }

    #[test]
    fn test_set_count_floors_at_one() {
        let mut model = NgramModel::new(2);
        model.observe("a", 'b');
        assert_eq!(model.set_count("a", 'b', 0), Some(1));
        assert_eq!(model.count("a", 'b'), Some(1));
        assert_eq!(model.set_count("z", 'b', 5), None);
    }

    #[test]
    fn test_boost_chars_touches_existing_transitions_only() {
        let mut model = NgramModel::new(2);
        model.observe("a", 'b');
        model.observe("b", 'a');
        model.observe("c", 'b');
        let chars = std::collections::BTreeSet::from(['b', 'z']);

        assert_eq!(model.boost_chars(&chars), 2);
        assert_eq!(model.count("a", 'b'), Some(2));
        assert_eq!(model.count("c", 'b'), Some(2));
        assert_eq!(model.count("b", 'a'), Some(1));
        assert_eq!(model.count("a", 'z'), None);
    }

    #[test]
    fn test_store_roundtrip_and_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.json"));
        assert!(store.load().is_none());

        let mut model = NgramModel::new(2);
        model.observe("a", 'b');
        store.save(&model).unwrap();
        assert_eq!(store.load(), Some(model));

        std::fs::write(store.path(), "{{{ nope").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_store_migrates_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.txt"));
        std::fs::write(store.path(), r#"{"a": {"b": 2}, "b": {"a": 2}}"#).unwrap();

        let model = store.load().unwrap();
        assert_eq!(model.n(), 2);
        assert_eq!(model.count("a", 'b'), Some(2));

        // Re-saved in the current format
        let raw = std::fs::read(store.path()).unwrap();
        assert!(matches!(codec::decode(&raw), Decoded::Current(_)));
    }
}
