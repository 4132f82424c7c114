//! Error types for the feedgen pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting, storing, or serving posts.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed '{feed}' has no keywords; at least one keyword is required")]
    EmptyKeywords { feed: String },

    #[error("Feed '{feed}' keyword pattern failed to compile: {reason}")]
    InvalidPattern { feed: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed event: {0}")]
    Decode(String),

    #[error("Unknown feed: {0}")]
    UnknownFeed(String),

    #[error("Invalid cursor '{cursor}': {reason}")]
    InvalidCursor { cursor: String, reason: String },

    #[error("Limit must be between 1 and {max}, got {got}")]
    InvalidLimit { got: usize, max: usize },
}

impl FeedError {
    /// Returns `true` if the error was caused by a bad read-path request
    /// (unknown feed, bad cursor, out-of-range limit).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownFeed(_) | Self::InvalidCursor { .. } | Self::InvalidLimit { .. }
        )
    }

    /// Returns `true` if the error is recoverable by retrying on the next
    /// loop iteration (connection drop, store hiccup).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Storage(_))
    }

    /// Returns `true` if the error must stop the process before it serves.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::EmptyKeywords { .. } | Self::InvalidPattern { .. } | Self::Config(_)
        )
    }
}
