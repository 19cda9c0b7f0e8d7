//! Engine error type
//!
//! The core never treats these as fatal: callers log them and degrade to
//! "do nothing this cycle". The CLI and HTTP layers wrap them in `anyhow`.

use thiserror::Error;

/// Errors raised by the persistent parts of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pattern memory error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, EngineError>;
