//! Arianna core - an adaptive character n-gram organism
//!
//! The engine:
//! - trains character n-gram models from documents and its own logs
//! - remembers every window it has seen in a SQLite pattern memory
//! - mutates its own weights, keeping changes that raise novelty
//! - boosts characters of high-entropy samples after each retrain
//! - retrains when its corpus changes and dreams when left alone
//! - rotates and archives its logs
//!
//! # Example
//!
//! ```ignore
//! use arianna_core::{Config, Engine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let layout = config.layout()?;
//!     let engine = std::sync::Arc::new(Engine::open(config, layout)?);
//!     println!("{}", engine.chat("hello").await);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod persist;
pub mod types;
pub mod model;
pub mod memory;
pub mod metrics;
pub mod immune;
pub mod mutation;
pub mod resonance;
pub mod corpus;
pub mod logs;
pub mod lifecycle;
pub mod backend;
pub mod config;
pub mod engine;

// Outer surfaces
pub mod health;
pub mod server;
pub mod cli;

pub use config::{Config, Layout};
pub use engine::{Engine, ReproductionReport, SessionCounters};
pub use error::{EngineError, Result};
pub use health::HealthReport;
pub use memory::PatternMemory;
pub use model::{NgramModel, Trainer};
pub use types::{ChatReply, ReplySource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - adaptive n-gram organism", NAME, VERSION)
}
