//! Plain-text event logs
//!
//! One line per event with an RFC3339 prefix. Files past a size threshold
//! are gzipped, indexed and pruned to a retention count.

pub mod rotation;
pub mod stream;

pub use rotation::LogRotator;
pub use stream::LogStream;
