//! Denylist input filter
//!
//! This is a plain token denylist, not semantic moderation. Input is split
//! on whitespace and lowercased; a token must equal a banned word exactly,
//! so obfuscated spellings or words with glued punctuation get through.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Immune filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmuneConfig {
    /// Banned tokens (matched case-insensitively)
    #[serde(default = "default_banned")]
    pub banned: Vec<String>,
}

fn default_banned() -> Vec<String> {
    vec!["badword".to_string(), "hate".to_string(), "kill".to_string()]
}

impl Default for ImmuneConfig {
    fn default() -> Self {
        Self {
            banned: default_banned(),
        }
    }
}

/// Rejects input containing a banned token and counts rejections.
#[derive(Debug)]
pub struct ImmuneFilter {
    banned: HashSet<String>,
    rejections: AtomicU64,
}

impl ImmuneFilter {
    pub fn new<I, S>(banned: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            banned: banned
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ImmuneConfig) -> Self {
        Self::new(&config.banned)
    }

    /// `true` if `text` may pass. A rejection bumps the counter once.
    pub fn check(&self, text: &str) -> bool {
        let hit = text
            .split_whitespace()
            .any(|token| self.banned.contains(&token.to_lowercase()));
        if hit {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            debug!("Immune filter rejected input");
        }
        !hit
    }

    /// Rejections since process start.
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

impl Default for ImmuneFilter {
    fn default() -> Self {
        Self::from_config(&ImmuneConfig::default())
    }
}
