//! Post repository: read-through access to a [`PostStore`] backed by a
//! [`WeakCacheTable`].
//!
//! The repository is the only mutation path into its table. Population is
//! lazy: an entry is created when a lookup misses and the store returns a
//! post. Store failures are propagated and never cached.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use postcache_core::{
    Post, PostCacheError, PostCacheResult, PostId, RepositoryConfig, StoreError,
};

use super::key::CacheKey;
use super::sweeper::{SweeperHandle, SweeperSnapshot, SweeperState};
use super::traits::{CacheStats, PostStore};
use super::weak_table::WeakCacheTable;

/// A post returned by [`PostRepository::get_post_by_id`].
///
/// Holds the cache key of its entry: as long as any `CachedPost` (or a clone
/// of its key) is alive, the entry cannot be reclaimed. It can still be
/// evicted by the sweeper.
#[derive(Debug, Clone)]
pub struct CachedPost {
    key: CacheKey,
    post: Arc<Post>,
    was_cache_hit: bool,
}

impl CachedPost {
    /// The key keeping this entry alive.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn post(&self) -> &Arc<Post> {
        &self.post
    }

    /// True if served from the cache, false if fetched from the store.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Release the key and keep only the post.
    ///
    /// Once every key handle for the entry is gone it becomes eligible for
    /// reclamation.
    pub fn into_post(self) -> Arc<Post> {
        self.post
    }
}

impl Deref for CachedPost {
    type Target = Post;

    fn deref(&self) -> &Post {
        &self.post
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    store_errors: AtomicU64,
}

/// Read-through post cache with weak key retention and optional periodic
/// eviction.
///
/// # Example
///
/// ```ignore
/// let repo = PostRepository::new(store, RepositoryConfig::default())?;
///
/// let post = repo.get_post_by_id(1).await?;
/// assert!(!repo.is_empty());
///
/// drop(post);
/// // The entry is reclaimed the next time the table drains its notices,
/// // so emptiness is only eventually observable.
/// while !repo.is_empty() {
///     tokio::time::sleep(Duration::from_millis(5)).await;
/// }
/// ```
#[derive(Debug)]
pub struct PostRepository<S>
where
    S: PostStore,
{
    /// The backing store consulted on misses.
    store: S,
    /// Cached posts.
    table: WeakCacheTable<Post>,
    /// Background sweeper, when enabled.
    sweeper: Option<SweeperHandle>,
    /// Repository configuration.
    config: RepositoryConfig,
    counters: StatsCounters,
}

impl<S> PostRepository<S>
where
    S: PostStore,
{
    /// Create a repository over `store`.
    ///
    /// Spawns the eviction sweeper on the current tokio runtime when
    /// `config.sweeper.enabled` is set.
    pub fn new(store: S, config: RepositoryConfig) -> PostCacheResult<Self> {
        config.validate()?;
        let table = WeakCacheTable::new();

        let sweeper = if config.sweeper.enabled {
            Some(SweeperHandle::spawn(table.clone(), config.sweeper.clone())?)
        } else {
            None
        };

        tracing::debug!(
            sweeper_enabled = config.sweeper.enabled,
            period_ms = config.sweeper.period.as_millis() as u64,
            "Post repository created"
        );

        Ok(Self {
            store,
            table,
            sweeper,
            config,
            counters: StatsCounters::default(),
        })
    }

    /// Create a repository with default configuration.
    pub fn with_defaults(store: S) -> PostCacheResult<Self> {
        Self::new(store, RepositoryConfig::default())
    }

    /// Get the repository configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Get a reference to the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a reference to the cache table.
    pub fn table(&self) -> &WeakCacheTable<Post> {
        &self.table
    }

    /// Get a post by id, fetching from the store on miss.
    ///
    /// On a hit the returned [`CachedPost`] shares the key of the existing
    /// entry. On a miss a new key is created and stored with the fetched
    /// post. Store errors are returned unchanged and leave the cache as it
    /// was.
    pub async fn get_post_by_id(&self, id: impl Into<PostId>) -> PostCacheResult<CachedPost> {
        let id = id.into();

        if let Some((key, post)) = self.table.get_entry(id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(post_id = %id, "Cache hit");
            return Ok(CachedPost {
                key,
                post,
                was_cache_hit: true,
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let post = Arc::new(self.fetch(id).await?);
        let key = CacheKey::new(id);
        self.table.put(&key, Arc::clone(&post));

        Ok(CachedPost {
            key,
            post,
            was_cache_hit: false,
        })
    }

    /// Get a post for a caller-owned key.
    ///
    /// The caller decides the entry's lifetime: the entry stored on a miss
    /// lives while `key` (or a clone) does.
    pub async fn get_post(&self, key: &CacheKey) -> PostCacheResult<Arc<Post>> {
        if let Some(post) = self.table.get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(post_id = %key.id(), "Cache hit");
            return Ok(post);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let post = Arc::new(self.fetch(key.id()).await?);
        self.table.put(key, Arc::clone(&post));
        Ok(post)
    }

    async fn fetch(&self, id: PostId) -> PostCacheResult<Post> {
        self.store.fetch(id).await.map_err(|err| {
            self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
            match &err {
                StoreError::NotFound { .. } => {
                    tracing::debug!(post_id = %id, "Post not found in store");
                }
                StoreError::Unavailable { reason } => {
                    tracing::warn!(post_id = %id, reason = %reason, "Store unavailable");
                }
            }
            PostCacheError::from(err)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entry_count = self.table.len() as u64;
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
            entry_count,
            reclaimed: self.table.reclaimed_count(),
            evictions: self
                .sweeper
                .as_ref()
                .map(|s| s.metrics().evictions)
                .unwrap_or(0),
        }
    }

    pub fn sweeper_state(&self) -> Option<SweeperState> {
        self.sweeper.as_ref().map(SweeperHandle::state)
    }

    pub fn sweeper_metrics(&self) -> Option<SweeperSnapshot> {
        self.sweeper.as_ref().map(SweeperHandle::metrics)
    }

    /// Ask the sweeper to stop without waiting. No-op when disabled.
    pub fn stop_sweeper(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop();
        }
    }

    /// Stop the sweeper and wait for it, returning its final metrics.
    pub async fn shutdown(self) -> Option<SweeperSnapshot> {
        match self.sweeper {
            Some(sweeper) => Some(sweeper.shutdown().await),
            None => None,
        }
    }
}
