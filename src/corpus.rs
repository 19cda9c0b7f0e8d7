//! Corpus loading
//!
//! The engine only sees the [`CorpusSource`] port. [`FileCorpus`] reads the
//! configured documents, the dataset directory and the organism's own logs.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Anything that can hand the trainer one text blob.
pub trait CorpusSource: Send + Sync {
    /// Full corpus text. Never fails; missing pieces are simply absent.
    fn load(&self) -> String;
}

/// Fixed in-memory corpus.
#[derive(Debug, Clone, Default)]
pub struct StaticCorpus(pub String);

impl CorpusSource for StaticCorpus {
    fn load(&self) -> String {
        self.0.clone()
    }
}

/// Corpus made of files on disk, joined with newlines in this order:
/// documents, dataset directory (by file name), logs.
#[derive(Debug, Clone, Default)]
pub struct FileCorpus {
    documents: Vec<PathBuf>,
    dataset_dir: Option<PathBuf>,
    extensions: Vec<String>,
    logs: Vec<PathBuf>,
}

impl FileCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(mut self, documents: impl IntoIterator<Item = PathBuf>) -> Self {
        self.documents.extend(documents);
        self
    }

    /// Read every file in `dir` whose extension is in `extensions`.
    pub fn with_dataset_dir(mut self, dir: impl Into<PathBuf>, extensions: &[String]) -> Self {
        self.dataset_dir = Some(dir.into());
        self.extensions = extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect();
        self
    }

    pub fn with_logs(mut self, logs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.logs.extend(logs);
        self
    }

    /// Paths contributing to the corpus right now, in load order.
    pub fn sources(&self) -> Vec<PathBuf> {
        let mut paths = self.documents.clone();
        if let Some(dir) = &self.dataset_dir {
            paths.extend(dataset_files(dir, &self.extensions));
        }
        paths.extend(self.logs.iter().cloned());
        paths
    }
}

impl CorpusSource for FileCorpus {
    fn load(&self) -> String {
        let parts: Vec<String> = self
            .sources()
            .iter()
            .filter_map(|path| match std::fs::read(path) {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    debug!("Skipping corpus source {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        parts.join("\n")
    }
}

fn dataset_files(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    extensions.iter().any(|allowed| *allowed == ext)
                })
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_order_and_missing_files() {
        let dir = tempdir().unwrap();
        let datasets = dir.path().join("datasets");
        fs::create_dir_all(&datasets).unwrap();
        fs::write(dir.path().join("README.md"), "readme").unwrap();
        fs::write(datasets.join("b.md"), "second").unwrap();
        fs::write(datasets.join("a.txt"), "first").unwrap();
        fs::write(datasets.join("skip.bin"), "binary").unwrap();
        fs::write(dir.path().join("human.log"), "log").unwrap();

        let corpus = FileCorpus::new()
            .with_documents([dir.path().join("README.md"), dir.path().join("missing.md")])
            .with_dataset_dir(&datasets, &["md".to_string(), ".txt".to_string()])
            .with_logs([dir.path().join("human.log"), dir.path().join("dream.log")]);

        assert_eq!(corpus.load(), "readme\nfirst\nsecond\nlog");
    }

    #[test]
    fn test_empty_when_nothing_exists() {
        let corpus = FileCorpus::new()
            .with_documents([PathBuf::from("/nope/a.md")])
            .with_dataset_dir("/nope/datasets", &["md".to_string()]);
        assert_eq!(corpus.load(), "");
    }

    #[test]
    fn test_static_corpus() {
        assert_eq!(StaticCorpus("abc".into()).load(), "abc");
    }
}
