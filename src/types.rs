//! Shared types used across modules
//!
//! Reply types live here so the engine, the HTTP server and the CLI can
//! all speak them without depending on each other.

use serde::{Deserialize, Serialize};

/// Text returned when the session message quota is used up.
pub const LIMIT_REACHED_TEXT: &str = "Message limit reached for this session.";

/// Text returned when the immune filter rejects the input.
pub const BLOCKED_TEXT: &str = "Message blocked.";

/// Where a reply's text came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// External completion backend
    Backend,
    /// Local n-gram generator
    Local,
}

impl std::fmt::Display for ReplySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplySource::Backend => write!(f, "backend"),
            ReplySource::Local => write!(f, "local"),
        }
    }
}

/// Outcome of one chat turn. Quota and filter rejections are ordinary
/// replies, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    LimitReached,
    Blocked,
    Reply { text: String, source: ReplySource },
}

impl ChatReply {
    /// Text to show the user.
    pub fn text(&self) -> &str {
        match self {
            ChatReply::LimitReached => LIMIT_REACHED_TEXT,
            ChatReply::Blocked => BLOCKED_TEXT,
            ChatReply::Reply { text, .. } => text,
        }
    }

    pub fn source(&self) -> Option<ReplySource> {
        match self {
            ChatReply::Reply { source, .. } => Some(*source),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}
