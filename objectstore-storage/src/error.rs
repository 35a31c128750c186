//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The engine has not been opened, or was closed.
    #[error("storage engine not open")]
    NotOpen,

    /// A previous writer panicked while holding the engine lock.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}
