//! Health report for diagnostics and the `/health` endpoint

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::engine::Engine;
use crate::metrics::{calculate_affinity, DEFAULT_AFFINITY_WORDS};
use crate::persist::file_size;

/// Characters generated to gauge sample quality
const SAMPLE_LEN: usize = 20;
/// Patterns included in the report
const TOP_PATTERNS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub model_exists: bool,
    pub model_n: Option<usize>,
    pub model_contexts: usize,
    pub log_size: u64,
    pub dream_log_size: u64,
    pub sample_quality: usize,
    pub affinity: f64,
    pub top_patterns: Vec<(String, u64)>,
    pub last_entropy: Option<f64>,
    pub messages_sent: u64,
    pub immune_blocked: u64,
    pub last_reproduction: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl HealthReport {
    /// Gather a report. Never fails; unreadable parts come back empty.
    pub fn collect(engine: &Engine) -> Self {
        let layout = engine.layout();
        let model = engine.current_model();
        let sample = model
            .as_deref()
            .map(|m| engine.sample(m, SAMPLE_LEN, None))
            .unwrap_or_default();
        let top_patterns = engine.patterns().top(TOP_PATTERNS).unwrap_or_else(|e| {
            warn!("Failed to read top patterns: {}", e);
            Vec::new()
        });
        let counters = engine.session_counters();

        Self {
            status: "alive",
            model_exists: layout.model_file.exists(),
            model_n: model.as_ref().map(|m| m.n()),
            model_contexts: model.as_ref().map(|m| m.context_count()).unwrap_or(0),
            log_size: file_size(&layout.interaction_log),
            dream_log_size: file_size(&layout.dream_log),
            sample_quality: sample.chars().count(),
            affinity: calculate_affinity(&sample, DEFAULT_AFFINITY_WORDS),
            top_patterns,
            last_entropy: engine.last_entropy(),
            messages_sent: counters.messages_sent,
            immune_blocked: counters.immune_blocked,
            last_reproduction: engine.last_reproduction(),
            last_activity: engine.last_activity(),
        }
    }
}
