//! Builds a fresh `NgramModel` from a text blob

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{NgramModel, MIN_N};

/// Thresholds for adaptive order selection and long-tail pruning.
///
/// The values are inherited behavior: they bound branching as the corpus
/// grows and are not tuned against any quality metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Corpus size (chars) above which `n` becomes 3
    #[serde(default = "default_medium_corpus_chars")]
    pub medium_corpus_chars: usize,
    /// Corpus size (chars) above which `n` becomes 4
    #[serde(default = "default_large_corpus_chars")]
    pub large_corpus_chars: usize,
    /// Context count above which contexts seen only once are dropped (n > 3)
    #[serde(default = "default_max_contexts")]
    pub max_contexts: usize,
}

fn default_medium_corpus_chars() -> usize {
    100_000
}

fn default_large_corpus_chars() -> usize {
    1_000_000
}

fn default_max_contexts() -> usize {
    50_000
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            medium_corpus_chars: default_medium_corpus_chars(),
            large_corpus_chars: default_large_corpus_chars(),
            max_contexts: default_max_contexts(),
        }
    }
}

/// Character n-gram trainer
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Pick `n` from the corpus size in characters.
    pub fn choose_n(&self, char_count: usize) -> usize {
        if char_count > self.config.large_corpus_chars {
            4
        } else if char_count > self.config.medium_corpus_chars {
            3
        } else {
            MIN_N
        }
    }

    /// Train a model over `text`.
    ///
    /// The model is built from scratch; nothing is merged from prior runs.
    pub fn train(&self, text: &str, n: Option<usize>) -> NgramModel {
        let chars: Vec<char> = text.chars().collect();
        let n = n.unwrap_or_else(|| self.choose_n(chars.len())).max(MIN_N);
        let mut model = NgramModel::new(n);

        if chars.len() >= n {
            let mut context = String::with_capacity(n * 4);
            for window in chars.windows(n) {
                context.clear();
                context.extend(&window[..n - 1]);
                model.observe(&context, window[n - 1]);
            }
        }

        if model.context_count() > self.config.max_contexts && n > 3 {
            let before = model.context_count();
            model.retain_contexts(|_, transitions| {
                transitions.values().copied().max().unwrap_or(0) != 1
            });
            debug!(
                "Pruned long tail: {} -> {} contexts (n={})",
                before,
                model.context_count(),
                n
            );
        }

        model
    }
}
