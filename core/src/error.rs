//! Tagged error type returned by the memory engine's public API.

use thiserror::Error;

/// Errors surfaced by `memoria`'s public operations (spec §6.5).
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Empty text, a malformed id, or an out-of-range threshold.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An id-addressed operation found no non-deleted row.
    #[error("not found: {0}")]
    NotFound(String),

    /// A vector-capable operation was requested but no embedder is configured.
    #[error("embedder required but not configured")]
    NotConfigured,

    /// The storage engine returned an error.
    #[error("storage backend error: {0}")]
    Backend(#[source] anyhow::Error),

    /// The embedding adapter failed.
    #[error("embedding error: {0}")]
    Embedding(#[source] anyhow::Error),

    /// The chat-completion adapter failed.
    #[error("llm error: {0}")]
    Llm(#[source] anyhow::Error),
}

/// Result type alias used throughout the engine.
pub type Result<T> = core::result::Result<T, MemoryError>;

impl From<libsql::Error> for MemoryError {
    fn from(err: libsql::Error) -> Self {
        Self::Backend(anyhow::Error::new(err))
    }
}
