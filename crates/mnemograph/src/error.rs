//! Error types for Mnemograph

use thiserror::Error;

/// Main error type for Mnemograph operations
#[derive(Error, Debug)]
pub enum MnemographError {
    /// Invalid input on memory or edge construction
    #[error("Validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    /// Caller is not allowed to read or write the target
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Memory or edge does not exist (or is invisible to the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reflection requested over fewer memories than required
    #[error("Insufficient memories: found {found}, need at least {required}")]
    InsufficientMemories { found: usize, required: usize },

    /// No embedding adapter is configured
    #[error("No embedding adapter configured")]
    EmbeddingUnavailable,

    /// Transient embedding failure (timeout, 5xx, 429) - safe to retry
    #[error("Embedding error (transient): {0}")]
    EmbeddingTransient(String),

    /// Permanent embedding failure (auth, bad request) - retrying won't help
    #[error("Embedding error (permanent): {0}")]
    EmbeddingPermanent(String),

    /// Batch embedding returned the wrong number of vectors
    #[error("Embedding batch length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Storage-related errors (SQLite, in-memory backend internals)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MnemographError {
    /// Validation error helper with field detail
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a transient embedding failure worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EmbeddingTransient(_))
    }

    /// Whether this error means the target memory no longer exists.
    ///
    /// The indexer treats this as terminal success: the memory was
    /// deleted between the initial write and the embedding pass.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for Mnemograph operations
pub type Result<T> = std::result::Result<T, MnemographError>;
