//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Producer failures are not represented here: `get_or_compute` hands the
/// caller's own error back untouched.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Arguments cannot be turned into a stable cache key
    #[error("Unsupported argument: {0}")]
    UnsupportedArgument(String),

    /// The disk backend cannot create or access its directory or lock
    #[error("Storage unavailable at {}: {reason}", path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    /// A stored entry failed validation; never escapes the disk store
    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    /// The injected codec could not encode or decode a value
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Builds a `StorageUnavailable` error for `path`.
    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CacheError::StorageUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for faults that a pass-through call can recover from.
    pub fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            CacheError::StorageUnavailable { .. } | CacheError::Io(_) | CacheError::CorruptEntry(_)
        )
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
