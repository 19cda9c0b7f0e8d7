//! The organism: one object owning every piece of mutable state
//!
//! `Engine` ties the model store, pattern memory, logs, watchers and the
//! optional backend together and exposes the lifecycle operations:
//! train, generate, reproduce, check for changes, dream and chat.
//! It is `Send + Sync` and meant to be shared as `Arc<Engine>`.
//!
//! A change check commits the watchers' snapshots only after the
//! reproduction it triggered succeeds, so a failed cycle is retried on the
//! next check instead of being lost.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{CompletionBackend, HttpBackend};
use crate::config::{Config, Layout};
use crate::corpus::{CorpusSource, FileCorpus};
use crate::error::Result;
use crate::immune::ImmuneFilter;
use crate::lifecycle::journal::{EvolutionJournal, StepKind};
use crate::lifecycle::watcher::{ChangeWatcher, FsInspector, PendingChange, StorageInspector};
use crate::logs::LogStream;
use crate::memory::{EventKind, EventLog, PatternMemory, PruneReport};
use crate::model::{generate_with, GenerateOptions, ModelStore, NgramModel, RngSampler, Trainer};
use crate::mutation::{AdaptiveMutator, MutationOutcome};
use crate::persist::StampFile;
use crate::resonance::{EntropyResonance, ResonanceOutcome};
use crate::types::{ChatReply, ReplySource};

/// Characters sampled after reproduction to measure entropy
const ENTROPY_SAMPLE_LEN: usize = 100;

/// Process-lifetime counters; reset only by restarting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub messages_sent: u64,
    pub immune_blocked: u64,
}

/// What one reproduction cycle did.
#[derive(Debug, Clone)]
pub struct ReproductionReport {
    pub n: usize,
    pub contexts: usize,
    pub corpus_chars: usize,
    pub patterns_recorded: usize,
    pub pruned: PruneReport,
    pub mutation: MutationOutcome,
    pub resonance: ResonanceOutcome,
    pub entropy: f64,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for ReproductionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} contexts={} corpus={} recorded={} pruned={} entropy={:.2} boosted={} mutation={}",
            self.n,
            self.contexts,
            self.corpus_chars,
            self.patterns_recorded,
            self.pruned.total(),
            self.entropy,
            self.resonance.boosted,
            self.mutation
        )
    }
}

/// Clears the in-flight flag when a background check ends, even by panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Engine {
    config: Config,
    layout: Layout,
    trainer: Trainer,
    mutator: AdaptiveMutator,
    store: ModelStore,
    cache: RwLock<Option<Arc<NgramModel>>>,
    corpus: Box<dyn CorpusSource>,
    patterns: PatternMemory,
    events: EventLog,
    resonance: EntropyResonance,
    immune: ImmuneFilter,
    backend: Option<Arc<dyn CompletionBackend>>,
    interactions: LogStream,
    dreams: LogStream,
    dataset_watcher: ChangeWatcher,
    log_watcher: ChangeWatcher,
    inspector: Box<dyn StorageInspector>,
    journal: EvolutionJournal,
    activity: StampFile,
    reproduced: StampFile,
    rng: Mutex<StdRng>,
    messages_sent: AtomicU64,
    last_entropy: Mutex<Option<f64>>,
    reproduction: Mutex<()>,
    change_check: Mutex<()>,
    check_in_flight: AtomicBool,
}

impl Engine {
    /// Open all state under `layout`.
    ///
    /// Creates the state directory and the pattern store if needed. The
    /// HTTP backend is attached when `config.backend.enabled` is set.
    pub fn open(config: Config, layout: Layout) -> Result<Self> {
        std::fs::create_dir_all(&layout.root)?;

        let patterns = PatternMemory::open(&layout.memory_db)?;
        let events = EventLog::open(&layout.events_db, config.server.event_ttl())?;

        let corpus = FileCorpus::new()
            .with_documents(layout.documents.iter().cloned())
            .with_dataset_dir(&layout.dataset_dir, &config.paths.dataset_extensions)
            .with_logs([layout.interaction_log.clone(), layout.dream_log.clone()]);

        let mut dataset_targets = layout.documents.clone();
        dataset_targets.push(layout.dataset_dir.clone());
        let dataset_watcher = ChangeWatcher::new(
            "dataset",
            dataset_targets,
            &layout.dataset_snapshot,
            &layout.dataset_changes,
        );
        let log_watcher = ChangeWatcher::new(
            "log",
            vec![layout.interaction_log.clone(), layout.dream_log.clone()],
            &layout.log_snapshot,
            &layout.log_changes,
        );

        let backend: Option<Arc<dyn CompletionBackend>> = if config.backend.enabled {
            match HttpBackend::new(config.backend.clone()) {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    warn!("Backend disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let generate = GenerateOptions {
            backoff_threshold: config.ngram.backoff_threshold,
        };

        Ok(Self {
            trainer: Trainer::new(config.ngram.trainer.clone()),
            mutator: AdaptiveMutator::new(config.mutation.clone()).with_generate_options(generate),
            store: ModelStore::new(&layout.model_file),
            cache: RwLock::new(None),
            corpus: Box::new(corpus),
            patterns,
            events,
            resonance: EntropyResonance::new(
                config.resonance.clone(),
                LogStream::new(&layout.entropy_log, config.logs),
            ),
            immune: ImmuneFilter::from_config(&config.immune),
            backend,
            interactions: LogStream::new(&layout.interaction_log, config.logs),
            dreams: LogStream::new(&layout.dream_log, config.logs),
            dataset_watcher,
            log_watcher,
            inspector: Box::new(FsInspector),
            journal: EvolutionJournal::new(&layout.evolution_log, &layout.evolution_metrics),
            activity: StampFile::new(&layout.last_activity),
            reproduced: StampFile::new(&layout.last_reproduction),
            rng: Mutex::new(StdRng::from_os_rng()),
            messages_sent: AtomicU64::new(0),
            last_entropy: Mutex::new(None),
            reproduction: Mutex::new(()),
            change_check: Mutex::new(()),
            check_in_flight: AtomicBool::new(false),
            config,
            layout,
        })
    }

    /// Replace (or remove) the external completion backend.
    pub fn with_backend(mut self, backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        self.backend = backend;
        self
    }

    /// Replace the corpus source.
    pub fn with_corpus(mut self, corpus: Box<dyn CorpusSource>) -> Self {
        self.corpus = corpus;
        self
    }

    /// Replace the storage inspector used by the change watchers.
    pub fn with_inspector(mut self, inspector: Box<dyn StorageInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Make every random choice reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn patterns(&self) -> &PatternMemory {
        &self.patterns
    }

    pub fn interactions(&self) -> &LogStream {
        &self.interactions
    }

    pub fn dreams(&self) -> &LogStream {
        &self.dreams
    }

    pub fn entropy_log(&self) -> &LogStream {
        self.resonance.log()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn journal(&self) -> &EvolutionJournal {
        &self.journal
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            backoff_threshold: self.config.ngram.backoff_threshold,
        }
    }

    fn pattern_n(&self) -> usize {
        self.config.memory.pattern_n
    }

    fn record_step(&self, kind: StepKind, detail: &str) {
        if let Err(e) = self.journal.record(kind, detail) {
            warn!("Failed to journal {} step: {}", kind, e);
        }
    }

    fn set_cached(&self, model: Arc<NgramModel>) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(model);
    }

    // ============ Model ============

    /// The in-memory model, falling back to the persisted snapshot.
    pub fn current_model(&self) -> Option<Arc<NgramModel>> {
        if let Some(model) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Some(Arc::clone(model));
        }
        let model = Arc::new(self.store.load()?);
        self.set_cached(Arc::clone(&model));
        Some(model)
    }

    /// Train on `text` and persist the result, replacing any prior model.
    ///
    /// `n` falls back to the configured level, then to the adaptive choice.
    pub fn train(&self, text: &str, n: Option<usize>) -> Result<Arc<NgramModel>> {
        let model = self.trainer.train(text, n.or(self.config.ngram.level));
        self.store.save(&model)?;
        info!(
            "Trained n={} model with {} contexts",
            model.n(),
            model.context_count()
        );
        self.record_step(
            StepKind::Train,
            &format!("n={} contexts={}", model.n(), model.context_count()),
        );
        let model = Arc::new(model);
        self.set_cached(Arc::clone(&model));
        Ok(model)
    }

    /// Train on the full corpus.
    pub fn train_from_corpus(&self, n: Option<usize>) -> Result<Arc<NgramModel>> {
        let text = self.corpus.load();
        self.train(&text, n)
    }

    fn model_or_train(&self) -> Result<Arc<NgramModel>> {
        match self.current_model() {
            Some(model) => Ok(model),
            None => self.train_from_corpus(None),
        }
    }

    /// Generate `length` characters from `model` with the engine's RNG.
    pub fn sample(&self, model: &NgramModel, length: usize, seed: Option<&str>) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sampler = RngSampler(&mut *rng);
        generate_with(model, length, seed, self.generate_options(), &mut sampler)
    }

    /// Generate from the current model, training one first if none exists.
    pub fn generate(&self, length: usize, seed: Option<&str>) -> Result<String> {
        let model = self.model_or_train()?;
        Ok(self.sample(&model, length, seed))
    }

    /// Novelty of `text` against pattern memory at the configured window.
    pub fn novelty(&self, text: &str) -> Result<f64> {
        self.patterns.novelty(text, self.pattern_n())
    }

    // ============ Reproduction ============

    /// Retrain from the full corpus, refresh pattern memory, mutate once,
    /// apply entropy resonance, persist and stamp. Concurrent calls run one
    /// after another.
    pub fn reproduce(&self) -> Result<ReproductionReport> {
        let _guard = self
            .reproduction
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let corpus = self.corpus.load();
        let corpus_chars = corpus.chars().count();
        let mut model = self.trainer.train(&corpus, self.config.ngram.level);

        let patterns_recorded = self.patterns.record(&corpus, self.pattern_n())?;
        let pruned = self
            .patterns
            .prune(self.config.memory.prune_min_count, self.config.memory.max_rows)?;

        let mutation = if self.config.mutation.enabled {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let mut sampler = RngSampler(&mut *rng);
            self.mutator.mutate(&mut model, &mut sampler, |sample| {
                self.novelty(sample).unwrap_or_else(|e| {
                    warn!("Novelty scoring failed: {}", e);
                    0.0
                })
            })
        } else {
            MutationOutcome::Skipped
        };

        let sample = self.sample(&model, ENTROPY_SAMPLE_LEN, None);
        let resonance = self.resonance.apply(&mut model, &sample)?;
        let entropy = resonance.entropy;

        self.store.save(&model)?;
        let at = self.reproduced.touch()?;

        *self
            .last_entropy
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(entropy);

        let report = ReproductionReport {
            n: model.n(),
            contexts: model.context_count(),
            corpus_chars,
            patterns_recorded,
            pruned,
            mutation,
            resonance,
            entropy,
            at,
        };
        self.set_cached(Arc::new(model));

        if !matches!(report.mutation, MutationOutcome::Skipped) {
            self.record_step(StepKind::Mutation, &report.mutation.to_string());
        }
        self.record_step(StepKind::Reproduction, &report.to_string());
        info!("Reproduction cycle complete: {}", report);
        Ok(report)
    }

    /// Poll both watchers; run one reproduction cycle if either fired.
    ///
    /// Returns whether a reproduction ran. Snapshots are committed only
    /// after the reproduction succeeds; on error the change stays pending.
    /// Concurrent checks run one after another.
    pub fn check_for_changes(&self) -> Result<bool> {
        let _guard = self
            .change_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let pending: Vec<(&ChangeWatcher, PendingChange)> =
            [&self.dataset_watcher, &self.log_watcher]
                .into_iter()
                .filter_map(|w| w.detect(self.inspector.as_ref()).map(|change| (w, change)))
                .collect();
        if pending.is_empty() {
            return Ok(false);
        }

        self.reproduce()?;

        let mut fired = Vec::with_capacity(pending.len());
        for (watcher, change) in &pending {
            watcher.commit(change)?;
            fired.push(format!("{} {}", watcher.name(), change.diff));
        }
        self.record_step(StepKind::Change, &fired.join("; "));
        Ok(true)
    }

    /// Run [`Engine::check_for_changes`] on the blocking pool.
    ///
    /// Returns `None` without spawning while an earlier background check
    /// is still running.
    pub fn spawn_change_check(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self
            .check_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Change check already running");
            return None;
        }

        let engine = Arc::clone(self);
        Some(tokio::task::spawn_blocking(move || {
            let _in_flight = InFlight(&engine.check_in_flight);
            if let Err(e) = engine.check_for_changes() {
                warn!("Background change check failed: {}", e);
            }
        }))
    }

    /// Whether a background change check is running.
    pub fn change_check_in_flight(&self) -> bool {
        self.check_in_flight.load(Ordering::Acquire)
    }

    pub fn last_reproduction(&self) -> Option<DateTime<Utc>> {
        self.reproduced.read()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.activity.read()
    }

    pub fn last_entropy(&self) -> Option<f64> {
        *self
            .last_entropy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ============ Dream ============

    /// Speak unprompted when nobody has interacted for `threshold`.
    ///
    /// Returns the dream text, or `None` while active or without a model.
    pub fn dream(&self, threshold: Duration) -> Result<Option<String>> {
        if let Some(last) = self.activity.read() {
            let idle = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
            if idle < threshold {
                debug!("Not dreaming: last activity {:?} ago", idle);
                return Ok(None);
            }
        }

        let Some(model) = self.current_model() else {
            return Ok(None);
        };
        if model.is_empty() {
            return Ok(None);
        }

        let text = self.sample(&model, self.config.dream.length, None);
        self.dreams.append(&text)?;
        // Recorded into pattern memory as the reply side of the exchange
        self.log_interaction("", &text)?;
        self.record_step(StepKind::Dream, &text);
        info!("Dreamed {} chars", text.chars().count());
        Ok(Some(text))
    }

    // ============ Chat ============

    /// Start a background change check, then answer without waiting for
    /// it. Never fails.
    pub async fn chat(self: &Arc<Self>, text: &str) -> ChatReply {
        self.spawn_change_check();
        self.respond(text).await
    }

    /// Quota check, immune filter, backend or local generation, styling,
    /// logging. Never fails.
    pub async fn respond(&self, text: &str) -> ChatReply {
        let allowed = self.config.chat.allowed_messages(self.interactions.size());
        let admitted = self
            .messages_sent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |sent| {
                (sent < allowed).then_some(sent + 1)
            })
            .is_ok();
        if !admitted {
            debug!("Session quota of {} messages reached", allowed);
            return ChatReply::LimitReached;
        }

        if !self.immune.check(text) {
            return ChatReply::Blocked;
        }

        let (mut reply, source) = match self.ask_backend(text).await {
            Some(reply) => (reply, ReplySource::Backend),
            None => (self.local_reply(text), ReplySource::Local),
        };

        let resonance = self.patterns.resonance_fraction().unwrap_or_else(|e| {
            warn!("Resonance lookup failed: {}", e);
            0.0
        });
        if resonance > self.config.chat.resonance_threshold {
            reply.push_str(&self.config.chat.emphasis);
        }

        if let Err(e) = self.log_interaction(text, &reply) {
            warn!("Failed to log interaction: {}", e);
        }
        self.record_step(StepKind::Chat, &format!("{} chars via {}", reply.chars().count(), source));

        ChatReply::Reply {
            text: reply,
            source,
        }
    }

    async fn ask_backend(&self, prompt: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        match tokio::time::timeout(self.config.backend.timeout(), backend.complete(prompt)).await {
            Ok(Some(reply)) if !reply.trim().is_empty() => Some(reply),
            Ok(_) => None,
            Err(_) => {
                warn!("{} backend timed out; using local generation", backend.name());
                None
            }
        }
    }

    fn local_reply(&self, text: &str) -> String {
        let model = match self.model_or_train() {
            Ok(model) => model,
            Err(e) => {
                warn!("No model available for reply: {}", e);
                return String::new();
            }
        };
        let seed: Option<String> = text.chars().last().map(String::from);
        self.sample(&model, self.config.ngram.reply_length, seed.as_deref())
    }

    /// Append an exchange to the interaction log, mark activity and feed
    /// both sides into pattern memory.
    pub fn log_interaction(&self, user: &str, reply: &str) -> Result<()> {
        self.interactions
            .append(&format!("USER:{} AI:{}", user, reply))?;
        self.activity.touch()?;
        let n = self.pattern_n();
        self.patterns.record(user, n)?;
        self.patterns.record(reply, n)?;
        Ok(())
    }

    /// Store one request event; failures are logged, never raised.
    pub fn record_event(&self, kind: EventKind, ip: &str) {
        if let Err(e) = self.events.record(kind, ip) {
            warn!("Failed to record {} event: {}", kind, e);
        }
    }

    pub fn session_counters(&self) -> SessionCounters {
        SessionCounters {
            messages_sent: self.messages_sent.load(Ordering::SeqCst),
            immune_blocked: self.immune.rejections(),
        }
    }

    // ============ Logs ============

    /// Force rotation checks on the interaction and dream logs.
    pub fn rotate_logs(&self) -> Result<Vec<PathBuf>> {
        let mut archived = Vec::new();
        for stream in [&self.interactions, &self.dreams] {
            if let Some(archive) = stream.rotate()? {
                archived.push(archive);
            }
        }
        Ok(archived)
    }

    /// Interaction log lines containing `needle`, live file first.
    pub fn search_logs(&self, needle: &str) -> Result<Vec<String>> {
        self.interactions.search(needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockCompletionBackend;
    use crate::corpus::StaticCorpus;
    use tempfile::TempDir;

    fn engine_with(dir: &TempDir, corpus: &str) -> Engine {
        let config = Config::default();
        let layout = Layout::new(dir.path(), &config.paths);
        Engine::open(config, layout)
            .unwrap()
            .with_corpus(Box::new(StaticCorpus(corpus.to_string())))
            .with_seed(7)
    }

    #[test]
    fn test_train_persists_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "");
        let model = engine.train("abcabcabc", Some(2)).unwrap();
        assert_eq!(model.count("c", 'a'), Some(2));
        assert!(engine.layout().model_file.exists());
        assert_eq!(engine.journal().counts().get("train"), Some(&1));
    }

    #[test]
    fn test_persisted_model_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        engine_with(&dir, "").train("abcabcabc", Some(2)).unwrap();

        let reopened = engine_with(&dir, "");
        let model = reopened.current_model().unwrap();
        assert_eq!(model.count("a", 'b'), Some(3));
    }

    #[test]
    fn test_generate_exact_length_and_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "the rain in spain");
        assert_eq!(engine.generate(25, Some("in")).unwrap().chars().count(), 25);

        let empty_dir = tempfile::tempdir().unwrap();
        let empty = engine_with(&empty_dir, "");
        assert_eq!(empty.generate(25, None).unwrap(), "");
    }

    #[test]
    fn test_reproduce_runs_all_steps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "resonance echo thunder love resonance echo");
        let report = engine.reproduce().unwrap();

        assert_eq!(report.n, 2);
        assert!(report.contexts > 0);
        assert!(report.patterns_recorded > 0);
        assert!(!matches!(report.mutation, MutationOutcome::Skipped));
        assert!(engine.layout().model_file.exists());
        assert_eq!(engine.last_reproduction(), Some(report.at));
        assert_eq!(engine.last_entropy(), Some(report.entropy));
        assert_eq!(report.resonance.entropy, report.entropy);
        assert_eq!(engine.journal().counts().get("reproduction"), Some(&1));

        let entropy_log = engine.entropy_log().read_all();
        assert_eq!(entropy_log.lines().count(), 1);
        assert!(entropy_log.contains(&format!("entropy={:.2}", report.entropy)));
    }

    #[test]
    fn test_reproduce_prunes_single_sightings() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "abcabcxyz");
        let report = engine.reproduce().unwrap();

        // Windows: abc x2, then bca cab bcx cxy xyz once each
        assert_eq!(report.patterns_recorded, 7);
        assert_eq!(report.pruned.below_threshold, 5);
        assert_eq!(engine.patterns().get("abc").unwrap(), Some(2));
        assert_eq!(engine.patterns().get("xyz").unwrap(), None);
    }

    #[test]
    fn test_dream_windows_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "");
        engine.train("abcabcabc", Some(2)).unwrap();

        let dream = engine.dream(Duration::ZERO).unwrap().unwrap();
        let chars: Vec<char> = dream.chars().collect();
        let mut expected: std::collections::HashMap<String, u64> = Default::default();
        for window in chars.windows(3) {
            *expected.entry(window.iter().collect()).or_default() += 1;
        }

        assert!(!expected.is_empty());
        for (window, count) in expected {
            assert_eq!(engine.patterns().get(&window).unwrap(), Some(count), "{}", window);
        }
    }

    #[test]
    fn test_reproduce_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "abcabcabc");
        engine.reproduce().unwrap();
        engine.reproduce().unwrap();
        let model = engine.current_model().unwrap();
        assert!(model.min_count().unwrap() >= 1);
        assert_eq!(engine.journal().counts().get("reproduction"), Some(&2));
    }

    #[test]
    fn test_dream_respects_activity() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "");

        // No model yet
        assert_eq!(engine.dream(Duration::ZERO).unwrap(), None);

        engine.train("abcabcabc", Some(2)).unwrap();
        engine.log_interaction("hi", "there").unwrap();
        assert_eq!(engine.dream(Duration::from_secs(3600)).unwrap(), None);

        let dream = engine.dream(Duration::ZERO).unwrap().unwrap();
        assert_eq!(dream.chars().count(), engine.config().dream.length);
        assert!(engine.dreams().read_all().contains(&dream));
        assert_eq!(engine.search_logs(&dream).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quota_and_immune() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "abcabcabc");

        assert_eq!(engine.respond("badword here").await, ChatReply::Blocked);
        assert_eq!(engine.session_counters().immune_blocked, 1);

        // Empty log allows 3 messages; the blocked one counted
        assert!(matches!(engine.respond("one").await, ChatReply::Reply { .. }));
        assert!(matches!(engine.respond("two").await, ChatReply::Reply { .. }));
        assert_eq!(engine.respond("three").await, ChatReply::LimitReached);
        assert_eq!(engine.session_counters().messages_sent, 3);
    }

    #[tokio::test]
    async fn test_local_reply_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "abcabcabc");

        let reply = engine.respond("ping a").await;
        assert_eq!(reply.source(), Some(ReplySource::Local));
        assert!(reply.text().starts_with('a'));

        let log = engine.interactions().read_all();
        assert!(log.contains("USER:ping a AI:"));
        assert!(engine.last_activity().is_some());
    }

    #[tokio::test]
    async fn test_backend_reply_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockCompletionBackend::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Some("from the backend".to_string()));
        mock.expect_name().return_const("mock");

        let engine = engine_with(&dir, "abcabcabc").with_backend(Some(Arc::new(mock)));
        let reply = engine.respond("hello").await;
        assert_eq!(reply.source(), Some(ReplySource::Backend));
        assert!(reply.text().starts_with("from the backend"));
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockCompletionBackend::new();
        mock.expect_complete().returning(|_| None);
        mock.expect_name().return_const("mock");

        let engine = engine_with(&dir, "abcabcabc").with_backend(Some(Arc::new(mock)));
        let reply = engine.respond("hello").await;
        assert_eq!(reply.source(), Some(ReplySource::Local));
    }

    #[tokio::test]
    async fn test_emphasis_when_resonant() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&dir, "abcabcabc");
        // Every pattern seen twice: resonance 1.0
        engine.patterns().record("xyz", 3).unwrap();
        engine.patterns().record("xyz", 3).unwrap();

        let reply = engine.respond("q").await;
        assert!(reply.text().ends_with('!'));
    }
}
