//! Configuration management
//!
//! TOML file with one section per subsystem. Every field has a default so
//! a partial (or missing) file is always usable. A few environment
//! variables override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::backend::BackendConfig;
use crate::immune::ImmuneConfig;
use crate::lifecycle::heartbeat::HeartbeatConfig;
use crate::logs::LogRotator;
use crate::model::TrainerConfig;
use crate::mutation::MutationConfig;
use crate::resonance::ResonanceConfig;

/// Fixed n-gram order, overriding the adaptive choice
pub const ENV_NGRAM_LEVEL: &str = "ARIANNA_NGRAM_LEVEL";
/// "1"/"true"/"yes" enables the external backend
pub const ENV_USE_BACKEND: &str = "ARIANNA_USE_BACKEND";
/// Root directory for all state files
pub const ENV_DATA_DIR: &str = "ARIANNA_DATA_DIR";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where state and corpus files live
    #[serde(default)]
    pub paths: PathsConfig,
    /// Training and generation
    #[serde(default)]
    pub ngram: NgramConfig,
    /// Pattern memory
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Log rotation for interaction and dream logs
    #[serde(default)]
    pub logs: LogRotator,
    /// Chat quota and response styling
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub immune: ImmuneConfig,
    #[serde(default)]
    pub dream: DreamConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
    /// Post-reproduction entropy check
    #[serde(default)]
    pub resonance: ResonanceConfig,
    /// Optional external completion backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Background reproduction/dream loop
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// HTTP surface
    #[serde(default)]
    pub server: ServerConfig,
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// State root; defaults to the platform data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Core documents, relative paths resolved against the data dir
    #[serde(default = "default_documents")]
    pub documents: Vec<PathBuf>,
    /// Directory of extra dataset files
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: PathBuf,
    /// Extensions read from the dataset directory
    #[serde(default = "default_dataset_extensions")]
    pub dataset_extensions: Vec<String>,
}

fn default_documents() -> Vec<PathBuf> {
    vec![PathBuf::from("README.md")]
}

fn default_dataset_dir() -> PathBuf {
    PathBuf::from("datasets")
}

fn default_dataset_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            documents: default_documents(),
            dataset_dir: default_dataset_dir(),
            dataset_extensions: default_dataset_extensions(),
        }
    }
}

/// Training and generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgramConfig {
    /// Fixed order; adaptive when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(flatten)]
    pub trainer: TrainerConfig,
    /// Consecutive unseen contexts before a random jump
    #[serde(default = "default_backoff_threshold")]
    pub backoff_threshold: usize,
    /// Characters in a locally generated reply
    #[serde(default = "default_reply_length")]
    pub reply_length: usize,
}

fn default_backoff_threshold() -> usize {
    1
}

fn default_reply_length() -> usize {
    80
}

impl Default for NgramConfig {
    fn default() -> Self {
        Self {
            level: None,
            trainer: TrainerConfig::default(),
            backoff_threshold: default_backoff_threshold(),
            reply_length: default_reply_length(),
        }
    }
}

/// Pattern memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Window length for recorded patterns and novelty
    #[serde(default = "default_pattern_n")]
    pub pattern_n: usize,
    /// Entries below this count are dropped on reproduction
    #[serde(default = "default_prune_min_count")]
    pub prune_min_count: u64,
    /// Row cap enforced after threshold pruning
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_pattern_n() -> usize {
    3
}

fn default_prune_min_count() -> u64 {
    2
}

fn default_max_rows() -> usize {
    100_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            pattern_n: default_pattern_n(),
            prune_min_count: default_prune_min_count(),
            max_rows: default_max_rows(),
        }
    }
}

/// Chat orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Interaction-log bytes that earn one extra message
    #[serde(default = "default_quota_bytes_per_message")]
    pub quota_bytes_per_message: u64,
    /// Messages allowed on an empty log
    #[serde(default = "default_quota_base")]
    pub quota_base: u64,
    /// Resonance fraction above which the emphasis marker is added
    #[serde(default = "default_resonance_threshold")]
    pub resonance_threshold: f64,
    #[serde(default = "default_emphasis")]
    pub emphasis: String,
}

fn default_quota_bytes_per_message() -> u64 {
    1000
}

fn default_quota_base() -> u64 {
    3
}

fn default_resonance_threshold() -> f64 {
    0.3
}

fn default_emphasis() -> String {
    "!".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            quota_bytes_per_message: default_quota_bytes_per_message(),
            quota_base: default_quota_base(),
            resonance_threshold: default_resonance_threshold(),
            emphasis: default_emphasis(),
        }
    }
}

impl ChatConfig {
    /// Messages allowed this session for a log of `log_bytes`.
    pub fn allowed_messages(&self, log_bytes: u64) -> u64 {
        let per = self.quota_bytes_per_message.max(1);
        (log_bytes / per + self.quota_base).max(1)
    }
}

/// Dream cycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamConfig {
    /// Seconds of inactivity before dreaming
    #[serde(default = "default_dream_threshold")]
    pub threshold_secs: u64,
    /// Characters generated per dream
    #[serde(default = "default_dream_length")]
    pub length: usize,
}

fn default_dream_threshold() -> u64 {
    600
}

fn default_dream_length() -> usize {
    80
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self {
            threshold_secs: default_dream_threshold(),
            length: default_dream_length(),
        }
    }
}

impl DreamConfig {
    pub fn threshold(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.threshold_secs)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds request events are kept; unset keeps them forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_ttl_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            event_ttl_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn event_ttl(&self) -> Option<std::time::Duration> {
        self.event_ttl_secs.map(std::time::Duration::from_secs)
    }
}

impl Config {
    /// Load from the default location, creating it with defaults if missing,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load from `path`, creating it with defaults if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply `ARIANNA_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_NGRAM_LEVEL) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n >= crate::model::MIN_N => self.ngram.level = Some(n),
                _ => warn!("Ignoring {}={:?}: expected an integer >= 2", ENV_NGRAM_LEVEL, raw),
            }
        }
        if let Some(raw) = lookup(ENV_USE_BACKEND) {
            self.backend.enabled = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(raw) = lookup(ENV_DATA_DIR) {
            if !raw.trim().is_empty() {
                self.paths.data_dir = Some(PathBuf::from(raw.trim()));
            }
        }
    }

    /// Resolved state root.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.paths.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }

    /// Concrete file layout under the state root.
    pub fn layout(&self) -> Result<Layout> {
        Ok(Layout::new(&self.data_dir()?, &self.paths))
    }
}

/// Every file the engine reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub documents: Vec<PathBuf>,
    pub dataset_dir: PathBuf,
    pub model_file: PathBuf,
    pub memory_db: PathBuf,
    pub events_db: PathBuf,
    pub interaction_log: PathBuf,
    pub dream_log: PathBuf,
    pub entropy_log: PathBuf,
    pub dataset_snapshot: PathBuf,
    pub dataset_changes: PathBuf,
    pub log_snapshot: PathBuf,
    pub log_changes: PathBuf,
    pub evolution_log: PathBuf,
    pub evolution_metrics: PathBuf,
    pub last_reproduction: PathBuf,
    pub last_activity: PathBuf,
}

impl Layout {
    pub fn new(root: &Path, paths: &PathsConfig) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };
        Self {
            root: root.to_path_buf(),
            documents: paths.documents.iter().map(|d| resolve(d)).collect(),
            dataset_dir: resolve(&paths.dataset_dir),
            model_file: root.join("model.json"),
            memory_db: root.join("memory.db"),
            events_db: root.join("events.db"),
            interaction_log: root.join("human.log"),
            dream_log: root.join("dream.log"),
            entropy_log: root.join("entropy.log"),
            dataset_snapshot: root.join("dataset_state.json"),
            dataset_changes: root.join("dataset_changes.log"),
            log_snapshot: root.join("log_state.json"),
            log_changes: root.join("log_changes.log"),
            evolution_log: root.join("evolution.log"),
            evolution_metrics: root.join("evolution_metrics.json"),
            last_reproduction: root.join("last_reproduction"),
            last_activity: root.join("last_activity"),
        }
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("org", "arianna", "arianna")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the platform data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("org", "arianna", "arianna")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default())
        .unwrap_or_else(|_| "# Default configuration\n".to_string())
}
