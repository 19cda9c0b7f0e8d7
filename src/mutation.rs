//! Novelty-guided single-weight mutation
//!
//! One hill-climb step per call: nudge a single transition count by ±1 and
//! keep the change only if freshly generated text is at least as novel as
//! before. No annealing, no lookahead.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{generate_with, GenerateOptions, NgramModel, Sampler};

/// Mutator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Characters generated to score each side of the comparison
    #[serde(default = "default_sample_len")]
    pub sample_len: usize,
    /// Whether reproduction runs the mutator at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_sample_len() -> usize {
    40
}

fn default_enabled() -> bool {
    true
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            sample_len: default_sample_len(),
            enabled: default_enabled(),
        }
    }
}

/// The single weight a mutation touched.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationStep {
    pub context: String,
    pub next: char,
    pub before: u64,
    pub after: u64,
    pub baseline: f64,
    pub candidate: f64,
}

/// Result of one [`AdaptiveMutator::mutate`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Empty model, nothing to mutate
    Skipped,
    /// Candidate scored at least the baseline; change kept
    Kept(MutationStep),
    /// Candidate scored lower; model restored
    Reverted(MutationStep),
}

impl MutationOutcome {
    pub fn is_kept(&self) -> bool {
        matches!(self, MutationOutcome::Kept(_))
    }
}

impl std::fmt::Display for MutationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationOutcome::Skipped => write!(f, "skipped"),
            MutationOutcome::Kept(step) => write!(
                f,
                "kept {:?}->{:?} {}->{} ({:.3} >= {:.3})",
                step.context, step.next, step.before, step.after, step.candidate, step.baseline
            ),
            MutationOutcome::Reverted(step) => write!(
                f,
                "reverted {:?}->{:?} {}->{} ({:.3} < {:.3})",
                step.context, step.next, step.before, step.after, step.candidate, step.baseline
            ),
        }
    }
}

/// Accept-if-not-worse weight mutator
#[derive(Debug, Clone, Default)]
pub struct AdaptiveMutator {
    config: MutationConfig,
    generate: GenerateOptions,
}

impl AdaptiveMutator {
    pub fn new(config: MutationConfig) -> Self {
        Self {
            config,
            generate: GenerateOptions::default(),
        }
    }

    pub fn with_generate_options(mut self, options: GenerateOptions) -> Self {
        self.generate = options;
        self
    }

    /// Apply one mutation step to `model` in place.
    ///
    /// `score` rates a generated sample (higher is better); the engine
    /// passes pattern-memory novelty.
    pub fn mutate<S, F>(&self, model: &mut NgramModel, sampler: &mut S, mut score: F) -> MutationOutcome
    where
        S: Sampler + ?Sized,
        F: FnMut(&str) -> f64,
    {
        if model.is_empty() {
            return MutationOutcome::Skipped;
        }

        let sample = generate_with(model, self.config.sample_len, None, self.generate, sampler);
        let baseline = score(&sample);

        let Some(context) = model
            .context_at(sampler.uniform(model.context_count()))
            .map(String::from)
        else {
            return MutationOutcome::Skipped;
        };
        let Some(next) = model.transitions(&context).and_then(|transitions| {
            let index = sampler.uniform(transitions.len());
            transitions.keys().nth(index).copied()
        }) else {
            return MutationOutcome::Skipped;
        };

        let Some(before) = model.count(&context, next) else {
            return MutationOutcome::Skipped;
        };
        let after = if sampler.coin() {
            before.saturating_add(1)
        } else {
            before.saturating_sub(1).max(1)
        };
        model.set_count(&context, next, after);

        let sample = generate_with(model, self.config.sample_len, None, self.generate, sampler);
        let candidate = score(&sample);

        let step = MutationStep {
            context,
            next,
            before,
            after,
            baseline,
            candidate,
        };

        if candidate >= baseline {
            debug!("Mutation kept: {:?}", step);
            MutationOutcome::Kept(step)
        } else {
            model.set_count(&step.context, step.next, before);
            debug!("Mutation reverted: {:?}", step);
            MutationOutcome::Reverted(step)
        }
    }
}
