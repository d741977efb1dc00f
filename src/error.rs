//! Error types for Recollect

use thiserror::Error;

use crate::types::FactId;

/// Result type alias for Recollect operations
pub type Result<T> = std::result::Result<T, RecollectError>;

/// Main error type for Recollect
#[derive(Error, Debug)]
pub enum RecollectError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Fact not found: {0}")]
    NotFound(FactId),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },

    #[error("Non-finite embedding value at index {index}")]
    NonFiniteEmbedding { index: usize },

    #[error("Embedding unavailable for: {0}")]
    EmbeddingUnavailable(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecollectError {
    /// Recoverable failures come from the external ports; the pipeline
    /// degrades to empty output instead of failing.
    pub fn is_recoverable(&self) -> bool {
        #[cfg(feature = "openai")]
        if matches!(self, RecollectError::Http(_)) {
            return true;
        }
        matches!(
            self,
            RecollectError::Transport(_)
                | RecollectError::MalformedResponse(_)
                | RecollectError::EmbeddingUnavailable(_)
        )
    }

    /// Store-level contract violations, fatal to the single operation only
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RecollectError::NotFound(_)
                | RecollectError::InvalidEmbeddingDimension { .. }
                | RecollectError::NonFiniteEmbedding { .. }
        )
    }
}
