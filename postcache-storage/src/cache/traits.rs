//! Backing store trait and cache statistics.
//!
//! The repository depends only on [`PostStore`]; any data source that can
//! produce a [`Post`] for an id can sit behind the cache.

use std::sync::Arc;

use async_trait::async_trait;
use postcache_core::{Post, PostId, StoreError};

/// Backing source for posts, consulted on every cache miss.
///
/// # Implementation Requirements
///
/// - `fetch` must be deterministic per id from the cache's point of view
/// - Unknown ids return [`StoreError::NotFound`]; temporary failures return
///   [`StoreError::Unavailable`]
/// - Calls must complete in bounded time; the cache adds no timeout
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Fetch the post with the given id.
    async fn fetch(&self, id: PostId) -> Result<Post, StoreError>;
}

#[async_trait]
impl<S> PostStore for Arc<S>
where
    S: PostStore + ?Sized,
{
    async fn fetch(&self, id: PostId) -> Result<Post, StoreError> {
        (**self).fetch(id).await
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of misses whose store fetch failed.
    pub store_errors: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Entries removed because their key became unreachable.
    pub reclaimed: u64,
    /// Entries removed by the eviction sweeper.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
