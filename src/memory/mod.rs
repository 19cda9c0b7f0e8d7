//! Long-term pattern memory
//!
//! Provides:
//! - SQLite-based n-gram substring counters
//! - Novelty scoring against everything recorded so far
//! - Threshold pruning and row-count capping
//! - The HTTP event record with optional TTL

pub mod events;
pub mod patterns;

pub use events::{Event, EventKind, EventLog};
pub use patterns::{PatternMemory, PruneReport};
