//! Text generation with context backoff
//!
//! Randomness comes from a [`Sampler`] so output is exactly reproducible
//! for a fixed sampler, model and seed.

use rand::Rng;

use super::NgramModel;

/// Source of the two random choices the generator makes.
pub trait Sampler {
    /// Uniform index in `0..len`. `len` is never 0.
    fn uniform(&mut self, len: usize) -> usize;

    /// Index drawn with probability proportional to `weights`.
    /// `weights` is never empty.
    fn weighted(&mut self, weights: &[u64]) -> usize;

    /// Fair coin flip.
    fn coin(&mut self) -> bool {
        self.uniform(2) == 1
    }
}

/// Sampler backed by any `rand` RNG.
#[derive(Debug, Clone)]
pub struct RngSampler<R>(pub R);

impl<R: Rng> Sampler for RngSampler<R> {
    fn uniform(&mut self, len: usize) -> usize {
        self.0.random_range(0..len)
    }

    fn weighted(&mut self, weights: &[u64]) -> usize {
        let total: u64 = weights.iter().sum();
        if total == 0 {
            return self.uniform(weights.len());
        }
        let mut pick = self.0.random_range(0..total);
        for (i, &w) in weights.iter().enumerate() {
            if pick < w {
                return i;
            }
            pick -= w;
        }
        weights.len() - 1
    }
}

/// Deterministic sampler: heaviest option (first on ties), index 0 for uniform.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySampler;

impl Sampler for GreedySampler {
    fn uniform(&mut self, _len: usize) -> usize {
        0
    }

    fn weighted(&mut self, weights: &[u64]) -> usize {
        let mut best = 0;
        for (i, &w) in weights.iter().enumerate() {
            if w > weights[best] {
                best = i;
            }
        }
        best
    }
}

/// Generation knobs that are not part of the model itself.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Consecutive misses on an unseen context before jumping to a random one
    pub backoff_threshold: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { backoff_threshold: 1 }
    }
}

/// Generate exactly `length` characters from `model`.
///
/// Returns an empty string for an empty model.
pub fn generate<S: Sampler + ?Sized>(
    model: &NgramModel,
    length: usize,
    seed: Option<&str>,
    sampler: &mut S,
) -> String {
    generate_with(model, length, seed, GenerateOptions::default(), sampler)
}

/// [`generate`] with explicit options.
pub fn generate_with<S: Sampler + ?Sized>(
    model: &NgramModel,
    length: usize,
    seed: Option<&str>,
    options: GenerateOptions,
    sampler: &mut S,
) -> String {
    if model.is_empty() || length == 0 {
        return String::new();
    }

    let (start, mut order) = start_context(model, seed, sampler);
    let mut out: Vec<char> = start.chars().collect();
    let mut context = start;
    let mut misses = 0usize;
    let threshold = options.backoff_threshold.max(1);

    while out.len() < length {
        match model.transitions(&context) {
            Some(transitions) => {
                let chars: Vec<char> = transitions.keys().copied().collect();
                let weights: Vec<u64> = transitions.values().copied().collect();
                out.push(chars[sampler.weighted(&weights)]);
                context = tail(&out, order - 1);
                misses = 0;
            }
            None => {
                // Every stored context has the same length, so a shorter
                // window can never hit; only the miss count matters.
                misses += 1;
                if misses >= threshold {
                    let jump = random_context(model, sampler);
                    let room = length - out.len();
                    out.extend(jump.chars().take(room));
                    order = jump.chars().count() + 1;
                    context = jump;
                    misses = 0;
                }
            }
        }
    }

    out.truncate(length);
    out.into_iter().collect()
}

/// Pick the starting context and the effective order used for stepping.
fn start_context<S: Sampler + ?Sized>(
    model: &NgramModel,
    seed: Option<&str>,
    sampler: &mut S,
) -> (String, usize) {
    if let Some(seed) = seed.filter(|s| !s.is_empty()) {
        let seed_chars: Vec<char> = seed.chars().collect();

        let full = tail(&seed_chars, model.context_len());
        if model.contains_context(&full) {
            return (full, model.n());
        }

        let last = tail(&seed_chars, 1);
        if model.contains_context(&last) {
            return (last, 2);
        }
    }

    let ctx = random_context(model, sampler);
    let order = ctx.chars().count() + 1;
    (ctx, order)
}

fn random_context<S: Sampler + ?Sized>(model: &NgramModel, sampler: &mut S) -> String {
    let index = sampler.uniform(model.context_count());
    model.context_at(index).unwrap_or_default().to_string()
}

fn tail(chars: &[char], len: usize) -> String {
    chars[chars.len().saturating_sub(len)..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Trainer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cycle_model() -> NgramModel {
        Trainer::default().train("abcabcabc", Some(2))
    }

    #[test]
    fn test_greedy_cycle() {
        let model = cycle_model();
        assert_eq!(generate(&model, 4, Some("a"), &mut GreedySampler), "abca");
    }

    #[test]
    fn test_seed_uses_trailing_context() {
        let model = cycle_model();
        assert_eq!(generate(&model, 3, Some("xyzb"), &mut GreedySampler), "bca");
    }

    #[test]
    fn test_unknown_seed_falls_back_to_first_context() {
        let model = cycle_model();
        // GreedySampler picks context index 0, which is "a"
        assert_eq!(generate(&model, 5, Some("q"), &mut GreedySampler), "abcab");
    }

    #[test]
    fn test_long_seed_uses_only_its_tail() {
        let mut model = NgramModel::new(2);
        model.observe("x", 'y');
        model.observe("y", 'x');
        let out = generate(&model, 4, Some("hello x"), &mut GreedySampler);
        assert_eq!(out, "xyxy");
    }

    #[test]
    fn test_dead_end_jumps_to_random_context() {
        // "b" never has a successor, so every visit to it forces a jump
        let model = Trainer::default().train("ab", Some(2));
        let out = generate(&model, 7, Some("a"), &mut GreedySampler);
        assert_eq!(out, "abababa");
    }

    #[test]
    fn test_length_is_exact() {
        let model = Trainer::default().train("the rain in spain stays mainly", Some(3));
        let mut sampler = RngSampler(StdRng::seed_from_u64(7));
        for length in [0usize, 1, 2, 5, 50, 333] {
            let out = generate(&model, length, Some("in"), &mut sampler);
            assert_eq!(out.chars().count(), length);
        }
    }

    #[test]
    fn test_empty_model_yields_empty_string() {
        let model = NgramModel::new(2);
        assert_eq!(generate(&model, 10, Some("a"), &mut GreedySampler), "");
    }

    #[test]
    fn test_deterministic_for_fixed_rng() {
        let model = Trainer::default().train("a rose is a rose is a rose", Some(3));
        let a = generate(&model, 60, Some("ro"), &mut RngSampler(StdRng::seed_from_u64(42)));
        let b = generate(&model, 60, Some("ro"), &mut RngSampler(StdRng::seed_from_u64(42)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_higher_backoff_threshold_still_fills_length() {
        // "zq" is a dead end: three misses, then a jump back to "xy"
        let model = Trainer::default().train("xyzq", Some(3));
        let options = GenerateOptions { backoff_threshold: 3 };
        let out = generate_with(&model, 12, Some("xy"), options, &mut GreedySampler);
        assert_eq!(out, "xyzqxyzqxyzq");
    }

    #[test]
    fn test_greedy_weighted_prefers_heaviest() {
        assert_eq!(GreedySampler.weighted(&[1, 5, 5, 2]), 1);
        assert_eq!(GreedySampler.weighted(&[3]), 0);
    }

    #[test]
    fn test_rng_weighted_never_picks_zero_weight() {
        let mut sampler = RngSampler(StdRng::seed_from_u64(3));
        for _ in 0..200 {
            assert_eq!(sampler.weighted(&[0, 4, 0]), 1);
        }
    }
}
