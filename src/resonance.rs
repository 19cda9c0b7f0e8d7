//! Entropy resonance
//!
//! After reproduction the engine samples the fresh model and measures the
//! sample's character entropy. A sample above the threshold "resonates":
//! every transition toward a character the sample used gains one count.
//! Each check is appended to the entropy log either way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::Result;
use crate::logs::LogStream;
use crate::metrics::calculate_entropy;
use crate::model::NgramModel;

/// Entropy resonance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResonanceConfig {
    /// Whether reproduction applies the boost at all; the check is still logged
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sample entropy, in bits, that must be exceeded
    #[serde(default = "default_entropy_threshold")]
    pub entropy_threshold: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_entropy_threshold() -> f64 {
    4.0
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            entropy_threshold: default_entropy_threshold(),
        }
    }
}

/// Strictly above the threshold.
pub fn resonance_check(entropy: f64, threshold: f64) -> bool {
    entropy > threshold
}

/// Boost every transition toward a character present in `sample`.
///
/// Returns how many counts changed; 0 for an empty model or sample.
pub fn entropy_mutation(model: &mut NgramModel, sample: &str) -> usize {
    let chars: BTreeSet<char> = sample.chars().collect();
    if chars.is_empty() {
        return 0;
    }
    model.boost_chars(&chars)
}

/// What one resonance check did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResonanceOutcome {
    pub entropy: f64,
    pub resonant: bool,
    /// Counts raised by the boost
    pub boosted: usize,
}

impl ResonanceOutcome {
    pub fn changed(&self) -> bool {
        self.boosted > 0
    }
}

impl std::fmt::Display for ResonanceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entropy={:.2} changed={}", self.entropy, self.changed())
    }
}

/// Applies the resonance check and keeps its log.
pub struct EntropyResonance {
    config: ResonanceConfig,
    log: LogStream,
}

impl EntropyResonance {
    pub fn new(config: ResonanceConfig, log: LogStream) -> Self {
        Self { config, log }
    }

    pub fn log(&self) -> &LogStream {
        &self.log
    }

    /// Measure `sample`, boost `model` when it resonates, log the result.
    pub fn apply(&self, model: &mut NgramModel, sample: &str) -> Result<ResonanceOutcome> {
        let entropy = calculate_entropy(sample);
        let resonant = resonance_check(entropy, self.config.entropy_threshold);
        let boosted = if resonant && self.config.enabled {
            entropy_mutation(model, sample)
        } else {
            0
        };
        let outcome = ResonanceOutcome {
            entropy,
            resonant,
            boosted,
        };
        self.log.append(&outcome.to_string())?;
        debug!("Entropy resonance: {}", outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogRotator;
    use crate::model::Trainer;

    fn resonance(dir: &tempfile::TempDir, threshold: f64) -> EntropyResonance {
        let config = ResonanceConfig {
            entropy_threshold: threshold,
            ..ResonanceConfig::default()
        };
        let log = LogStream::new(dir.path().join("entropy.log"), LogRotator::default());
        EntropyResonance::new(config, log)
    }

    #[test]
    fn test_check_is_strict() {
        assert!(resonance_check(4.01, 4.0));
        assert!(!resonance_check(4.0, 4.0));
        assert!(!resonance_check(0.0, 4.0));
    }

    #[test]
    fn test_mutation_boosts_sample_chars() {
        let mut model = NgramModel::new(2);
        model.observe("a", 'b');
        model.observe("b", 'b');
        model.observe("b", 'c');
        assert_eq!(entropy_mutation(&mut model, "b"), 2);
        assert_eq!(model.count("a", 'b'), Some(2));
        assert_eq!(model.count("b", 'b'), Some(2));
        assert_eq!(model.count("b", 'c'), Some(1));

        assert_eq!(entropy_mutation(&mut model, ""), 0);
    }

    #[test]
    fn test_low_entropy_sample_leaves_model_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = Trainer::default().train("abcabcabc", Some(2));
        let before = model.clone();

        let outcome = resonance(&dir, 4.0).apply(&mut model, "abcabc").unwrap();
        assert!(!outcome.resonant);
        assert!(!outcome.changed());
        assert_eq!(model, before);

        let log = std::fs::read_to_string(dir.path().join("entropy.log")).unwrap();
        assert!(log.trim_end().ends_with("entropy=1.58 changed=false"));
    }

    #[test]
    fn test_resonant_sample_boosts_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = Trainer::default().train("abcabcabc", Some(2));

        // Threshold 1.0: "abc" carries 1.58 bits
        let outcome = resonance(&dir, 1.0).apply(&mut model, "abc").unwrap();
        assert!(outcome.resonant);
        assert_eq!(outcome.boosted, 3);
        assert_eq!(model.count("a", 'b'), Some(4));

        let log = std::fs::read_to_string(dir.path().join("entropy.log")).unwrap();
        assert!(log.contains("entropy=1.58 changed=true"));
    }

    #[test]
    fn test_disabled_still_logs() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResonanceConfig {
            enabled: false,
            entropy_threshold: 0.5,
        };
        let log = LogStream::new(dir.path().join("entropy.log"), LogRotator::default());
        let resonance = EntropyResonance::new(config, log);
        let mut model = Trainer::default().train("abcabcabc", Some(2));

        let outcome = resonance.apply(&mut model, "abc").unwrap();
        assert!(outcome.resonant);
        assert_eq!(outcome.boosted, 0);
        assert_eq!(resonance.log().read_all().lines().count(), 1);
    }
}
