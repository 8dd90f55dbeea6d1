//! Errors surfaced by a message stream.

use thiserror::Error;

/// Failure scoped to one channel's stream. Always recoverable by retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Network or backend failure while loading a page.
    #[error("failed to load messages: {0}")]
    Fetch(String),

    /// Realtime channel could not be attached; reads still work.
    #[error("live updates unavailable: {0}")]
    Subscription(String),

    /// A targeted load returned a window without the requested message.
    #[error("message {0} not found in channel")]
    MessageNotFound(String),

    /// Operation issued while no channel is open.
    #[error("no channel is open")]
    NotOpen,
}

impl StreamError {
    /// Wrap any error chain as a fetch failure.
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        Self::Fetch(err.to_string())
    }

    pub fn subscription(err: impl std::fmt::Display) -> Self {
        Self::Subscription(err.to_string())
    }
}
