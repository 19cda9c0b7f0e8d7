//! Lifecycle: change detection, the evolution journal and the heartbeat

pub mod heartbeat;
pub mod journal;
pub mod watcher;

pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatOutcome};
pub use journal::{EvolutionJournal, StepKind};
pub use watcher::{ChangeWatcher, FsInspector, PendingChange, StorageInspector, WatchState};
