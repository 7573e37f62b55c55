//! Error types for Mnemo.
//!
//! This module defines a unified error enum covering configuration, I/O,
//! vector index lifecycle, identity tracking, remote search, scan bookkeeping
//! and ingestion errors.

use thiserror::Error;

/// Unified error type for Mnemo.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// Nothing is retried internally: errors surface to the immediate caller.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A data operation was attempted before the index was initialized
    #[error("Index not initialized")]
    IndexNotInitialized,

    /// The persisted index failed structural validation on load
    #[error("Corrupted index: {0}")]
    CorruptedIndex(String),

    /// Removal by UUID was requested but no identity map is populated
    #[error("Identity tracking is required to address vectors by UUID")]
    IdentityTrackingRequired,

    /// Parallel UUID list does not match the training vector count
    #[error("Training set has {vectors} vectors but {uuids} UUIDs were given")]
    TrainingSetSizeMismatch { vectors: usize, uuids: usize },

    /// A vector's length differs from the index dimension
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A UUID or handle is already bound to something else
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    /// Arguments that can never be valid (empty training set, empty path...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The native vector library rejected an operation
    #[error("Vector engine error: {0}")]
    Engine(String),

    /// Remote vector search service errors
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Scan record tracker errors
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A bulk operation was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Another task already holds the library's scan lock
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether this error is a caller-requested cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled(_))
    }

    /// Whether the on-disk index must be rebuilt from source to recover.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, AppError::CorruptedIndex(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
