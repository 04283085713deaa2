//! postcache Storage - Store Trait, In-Memory Store and Cache Layer
//!
//! Defines the backing-store abstraction for posts and the weak-keyed cache
//! that sits in front of it.

pub mod cache;

// Re-export cache types for callers
pub use cache::{
    select_oldest, sweep_once, CacheKey, CacheStats, CachedPost, PostRepository, PostStore,
    SweepOutcome, SweepReport, SweeperHandle, SweeperMetrics, SweeperSnapshot, SweeperState,
    WeakCacheTable,
};

use async_trait::async_trait;
use postcache_core::{Post, PostId, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory post store.
///
/// Stands in for a slow backing source: every fetch can be delayed by a
/// fixed latency. Cloning yields another handle to the same posts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPostStore {
    posts: Arc<RwLock<HashMap<PostId, Post>>>,
    latency: Option<Duration>,
}

impl InMemoryPostStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `posts`.
    pub fn with_posts(posts: impl IntoIterator<Item = Post>) -> Self {
        let store = Self::new();
        for post in posts {
            store.insert(post);
        }
        store
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert or replace a post.
    pub fn insert(&self, post: Post) -> Option<Post> {
        self.write().insert(post.id, post)
    }

    /// Remove a post from the store. Cached copies are unaffected.
    pub fn remove(&self, id: PostId) -> Option<Post> {
        self.write().remove(&id)
    }

    /// Get count of stored posts.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PostId, Post>> {
        self.posts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PostId, Post>> {
        self.posts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn fetch(&self, id: PostId) -> Result<Post, StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
