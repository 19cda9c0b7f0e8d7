//! Heartbeat - background reproduction and dreaming on a schedule
//!
//! Each tick polls the change watchers (reproducing if anything moved) and
//! then gives the organism a chance to dream. Blocking work runs on the
//! blocking pool so the runtime stays responsive.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Max consecutive errors before suspending
    #[serde(default = "default_max_errors")]
    pub max_consecutive_errors: u32,
    /// Base backoff duration in seconds
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,
    /// Maximum backoff duration in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_interval() -> u64 { 300 }
fn default_max_errors() -> u32 { 5 }
fn default_base_backoff() -> u64 { 30 }
fn default_max_backoff() -> u64 { 3600 }

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_consecutive_errors: default_max_errors(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

/// Result of a single heartbeat tick
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatOutcome {
    /// Nothing changed and no dream
    Ok,
    /// A watcher fired and a reproduction cycle ran
    Reproduced,
    /// The organism dreamed (possibly after reproducing)
    Dreamed(String),
    /// Error during tick
    Error(String),
    /// Too many consecutive errors
    Suspended,
}

impl std::fmt::Display for HeartbeatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeartbeatOutcome::Ok => write!(f, "OK"),
            HeartbeatOutcome::Reproduced => write!(f, "Reproduced"),
            HeartbeatOutcome::Dreamed(s) => write!(f, "Dream: {}", s),
            HeartbeatOutcome::Error(s) => write!(f, "Error: {}", s),
            HeartbeatOutcome::Suspended => write!(f, "Suspended"),
        }
    }
}

/// The heartbeat runner
pub struct Heartbeat {
    config: HeartbeatConfig,
    engine: Arc<Engine>,
    consecutive_errors: u32,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            consecutive_errors: 0,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Calculate backoff duration based on error count
    pub fn backoff_duration(&self, errors: u32) -> Duration {
        let secs = self
            .config
            .base_backoff_secs
            .saturating_mul(2u64.saturating_pow(errors));
        Duration::from_secs(secs.min(self.config.max_backoff_secs))
    }

    /// Execute a single heartbeat tick
    pub async fn tick(&mut self) -> HeartbeatOutcome {
        if self.consecutive_errors >= self.config.max_consecutive_errors {
            return HeartbeatOutcome::Suspended;
        }

        let engine = Arc::clone(&self.engine);
        let threshold = engine.config().dream.threshold();
        let result = tokio::task::spawn_blocking(move || {
            let reproduced = engine.check_for_changes()?;
            let dream = engine.dream(threshold)?;
            Ok::<_, crate::error::EngineError>((reproduced, dream))
        })
        .await;

        match result {
            Ok(Ok((reproduced, dream))) => {
                self.consecutive_errors = 0;
                match dream {
                    Some(text) => HeartbeatOutcome::Dreamed(text),
                    None if reproduced => HeartbeatOutcome::Reproduced,
                    None => HeartbeatOutcome::Ok,
                }
            }
            Ok(Err(e)) => {
                self.consecutive_errors += 1;
                HeartbeatOutcome::Error(e.to_string())
            }
            Err(e) => {
                self.consecutive_errors += 1;
                HeartbeatOutcome::Error(format!("Heartbeat task failed: {}", e))
            }
        }
    }

    /// Run the heartbeat loop until shutdown signal
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Heartbeat started (interval: {}s)", self.config.interval_secs);

        loop {
            let sleep_duration = if self.consecutive_errors > 0 {
                self.backoff_duration(self.consecutive_errors)
            } else {
                Duration::from_secs(self.config.interval_secs)
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    let outcome = self.tick().await;
                    match &outcome {
                        HeartbeatOutcome::Ok => debug!("Heartbeat: OK"),
                        HeartbeatOutcome::Reproduced => info!("Heartbeat: reproduced"),
                        HeartbeatOutcome::Dreamed(d) => info!("Heartbeat dream: {}", d),
                        HeartbeatOutcome::Error(e) => warn!("Heartbeat error: {}", e),
                        HeartbeatOutcome::Suspended => warn!(
                            "Heartbeat suspended after {} consecutive errors",
                            self.consecutive_errors
                        ),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Heartbeat shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Layout};
    use crate::corpus::StaticCorpus;

    fn engine(dir: &tempfile::TempDir, dream_threshold_secs: u64) -> Arc<Engine> {
        let mut config = Config::default();
        config.dream.threshold_secs = dream_threshold_secs;
        let layout = Layout::new(dir.path(), &config.paths);
        let engine = Engine::open(config, layout)
            .unwrap()
            .with_corpus(Box::new(StaticCorpus("abcabcabc".into())))
            .with_seed(1);
        Arc::new(engine)
    }

    #[test]
    fn test_heartbeat_config_defaults() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval_secs, 300);
        assert_eq!(config.max_consecutive_errors, 5);
    }

    #[test]
    fn test_backoff_duration() {
        let dir = tempfile::tempdir().unwrap();
        let hb = Heartbeat::new(HeartbeatConfig::default(), engine(&dir, 600));
        assert_eq!(hb.backoff_duration(0).as_secs(), 30); // base
        assert_eq!(hb.backoff_duration(1).as_secs(), 60); // 30*2
        assert_eq!(hb.backoff_duration(2).as_secs(), 120); // 30*4
        assert_eq!(hb.backoff_duration(10).as_secs(), 3600); // capped at max
        assert_eq!(hb.backoff_duration(200).as_secs(), 3600);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(format!("{}", HeartbeatOutcome::Ok), "OK");
        assert_eq!(format!("{}", HeartbeatOutcome::Dreamed("ab".into())), "Dream: ab");
    }

    #[tokio::test]
    async fn test_tick_without_model_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let mut hb = Heartbeat::new(HeartbeatConfig::default(), engine(&dir, 0));
        assert_eq!(hb.tick().await, HeartbeatOutcome::Ok);
        assert_eq!(hb.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_tick_dreams_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir, 0);
        engine.train("abcabcabc", Some(2)).unwrap();

        let mut hb = Heartbeat::new(HeartbeatConfig::default(), Arc::clone(&engine));
        match hb.tick().await {
            HeartbeatOutcome::Dreamed(text) => {
                assert_eq!(text.chars().count(), engine.config().dream.length)
            }
            other => panic!("expected a dream, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut hb = Heartbeat::new(HeartbeatConfig::default(), engine(&dir, 600));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { hb.run(rx).await });
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
