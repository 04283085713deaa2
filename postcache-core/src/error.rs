//! Error types for postcache operations

use crate::PostId;
use thiserror::Error;

/// Backing store errors.
///
/// Neither variant is ever cached: a failed fetch leaves the cache exactly as
/// it was, and the next lookup for the same id queries the store again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Post not found: {id}")]
    NotFound { id: PostId },

    #[error("Store temporarily unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    /// Whether the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Eviction sweeper errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SweeperError {
    #[error("Eviction sweeper is enabled but no tokio runtime is available")]
    RuntimeUnavailable,
}

/// Master error type for all postcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PostCacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sweeper error: {0}")]
    Sweeper(#[from] SweeperError),
}

impl PostCacheError {
    /// True for store failures the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_transient())
    }

    /// True when the store reported the post as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound { .. }))
    }
}

/// Result type alias for postcache operations.
pub type PostCacheResult<T> = Result<T, PostCacheError>;

// =============================================================================
// TESTS
// =============================================================================
