//! Text metrics used by reproduction and health reporting

use std::collections::HashMap;

/// Words whose presence counts toward [`calculate_affinity`] by default.
pub const DEFAULT_AFFINITY_WORDS: &[&str] = &["resonance", "echo", "thunder", "love"];

/// Shannon entropy of the character distribution, in bits. 0.0 for "".
pub fn calculate_entropy(text: &str) -> f64 {
    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for ch in text.chars() {
        *freq.entry(ch).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -freq
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Occurrences of `words` (case-insensitive, non-overlapping) per character
/// of `text`. 0.0 for "".
pub fn calculate_affinity<S: AsRef<str>>(text: &str, words: &[S]) -> f64 {
    let len = text.chars().count();
    if len == 0 {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits: usize = words
        .iter()
        .map(|w| w.as_ref())
        .filter(|w| !w.is_empty())
        .map(|w| lower.matches(&w.to_lowercase()).count())
        .sum();
    hits as f64 / len as f64
}
