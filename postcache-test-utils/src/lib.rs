//! postcache Test Utilities
//!
//! Shared test infrastructure for the postcache workspace:
//! - Proptest generators for post ids, posts and key timestamps
//! - Store wrappers that count or fail fetches
//! - Fixtures for common repository setups
//! - Custom assertions and a polling helper for eventual reclamation

// Re-export the in-memory store from its source crate
pub use postcache_storage::InMemoryPostStore;

// Re-export core types for convenience
pub use postcache_core::{
    now, Post, PostCacheError, PostCacheResult, PostId, RepositoryConfig, StoreError,
    SweeperConfig, Timestamp,
};
pub use postcache_storage::{CacheKey, PostRepository, PostStore, WeakCacheTable};

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// STORE WRAPPERS
// ============================================================================

/// Store wrapper that records how many times each id was fetched.
///
/// Clones share their counters, so a test can keep one handle while the
/// repository owns the other.
#[derive(Debug, Clone)]
pub struct CountingStore<S> {
    inner: S,
    total: Arc<AtomicU64>,
    per_id: Arc<DashMap<PostId, u64>>,
}

impl<S: PostStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            total: Arc::new(AtomicU64::new(0)),
            per_id: Arc::new(DashMap::new()),
        }
    }

    /// Total fetches across all ids.
    pub fn total_calls(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Fetches for a single id.
    pub fn calls_for(&self, id: impl Into<PostId>) -> u64 {
        self.per_id.get(&id.into()).map(|count| *count).unwrap_or(0)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: PostStore> PostStore for CountingStore<S> {
    async fn fetch(&self, id: PostId) -> Result<Post, StoreError> {
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.per_id.entry(id).or_insert(0) += 1;
        self.inner.fetch(id).await
    }
}

/// Store wrapper that reports the source as unavailable for the first
/// `failures` fetches, then delegates.
#[derive(Debug, Clone)]
pub struct FlakyStore<S> {
    inner: S,
    remaining_failures: Arc<AtomicUsize>,
}

impl<S: PostStore> FlakyStore<S> {
    pub fn new(inner: S, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
        }
    }

    /// Failures still pending.
    pub fn remaining_failures(&self) -> usize {
        self.remaining_failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: PostStore> PostStore for FlakyStore<S> {
    async fn fetch(&self, id: PostId) -> Result<Post, StoreError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable {
                reason: format!("injected failure for post {id}"),
            });
        }
        self.inner.fetch(id).await
    }
}

// ============================================================================
// POLLING
// ============================================================================

/// Poll `condition` every `poll` until it holds or `timeout` elapses.
///
/// Returns whether the condition was observed. Reclamation is eventual, so
/// tests on emptiness go through here instead of asserting immediately.
pub async fn eventually<F>(timeout: Duration, poll: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Like [`eventually`] with defaults suited to reclamation checks.
pub async fn eventually_default<F>(condition: F) -> bool
where
    F: FnMut() -> bool,
{
    eventually(Duration::from_secs(2), Duration::from_millis(5), condition).await
}

/// Await `fut` with a hard upper bound, panicking on timeout.
#[track_caller]
pub fn within<F: Future>(limit: Duration, fut: F) -> impl Future<Output = F::Output> {
    let caller = std::panic::Location::caller();
    async move {
        match tokio::time::timeout(limit, fut).await {
            Ok(output) => output,
            Err(_) => panic!("future did not complete within {limit:?} (called at {caller})"),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for postcache types.

    use super::*;
    use proptest::prelude::*;

    /// Generate any post id, negative ids included.
    pub fn arb_post_id() -> impl Strategy<Value = PostId> {
        any::<i64>().prop_map(PostId::new)
    }

    /// Generate post content.
    pub fn arb_content() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 .,!?]{0,120}"
    }

    /// Generate a post.
    pub fn arb_post() -> impl Strategy<Value = Post> {
        (arb_post_id(), arb_content()).prop_map(|(id, content)| Post::new(id, content))
    }

    /// Generate a set of distinct ids.
    pub fn arb_distinct_ids(max: usize) -> impl Strategy<Value = Vec<PostId>> {
        prop::collection::hash_set(any::<i64>(), 1..=max.max(1))
            .prop_map(|ids| ids.into_iter().map(PostId::new).collect())
    }

    /// Generate a key timestamp (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64, 0u32..1_000_000_000u32).prop_map(|(secs, nanos)| {
            chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_else(now)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and repositories for common scenarios.

    use super::*;

    /// Content stored for a seeded post.
    pub fn seeded_content(id: PostId) -> String {
        format!("seeded post {id}")
    }

    /// An in-memory store holding one post per id in `ids`.
    pub fn seeded_store(ids: impl IntoIterator<Item = i64>) -> InMemoryPostStore {
        InMemoryPostStore::with_posts(ids.into_iter().map(|raw| {
            let id = PostId::new(raw);
            Post::new(id, seeded_content(id))
        }))
    }

    /// A repository without a sweeper over a counting, seeded store.
    ///
    /// The returned store handle shares counters with the repository's.
    pub fn counting_repository(
        ids: impl IntoIterator<Item = i64>,
    ) -> (
        PostRepository<CountingStore<InMemoryPostStore>>,
        CountingStore<InMemoryPostStore>,
    ) {
        let store = CountingStore::new(seeded_store(ids));
        let repo = PostRepository::new(store.clone(), RepositoryConfig::without_sweeper())
            .unwrap_or_else(|err| panic!("repository without sweeper must build: {err}"));
        (repo, store)
    }

    /// A sweeper config with a short period and no initial delay.
    pub fn fast_sweeper(period: Duration) -> SweeperConfig {
        SweeperConfig::new()
            .with_period(period)
            .with_initial_delay(Duration::ZERO)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for postcache results.

    use super::*;

    /// Assert that a result is a not-found error for `id`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &PostCacheResult<T>, id: impl Into<PostId>) {
        let id = id.into();
        match result {
            Err(PostCacheError::Store(StoreError::NotFound { id: got })) => {
                assert_eq!(*got, id, "Wrong id in NotFound error");
            }
            other => panic!("Expected NotFound for {id}, got: {other:?}"),
        }
    }

    /// Assert that a result is a transient store error.
    #[track_caller]
    pub fn assert_transient<T: std::fmt::Debug>(result: &PostCacheResult<T>) {
        match result {
            Err(err) if err.is_transient() => {}
            other => panic!("Expected transient error, got: {other:?}"),
        }
    }

    /// Assert that `post` carries `id` and the seeded content for it.
    #[track_caller]
    pub fn assert_seeded_post(post: &Post, id: impl Into<PostId>) {
        let id = id.into();
        assert_eq!(post.id, id);
        assert_eq!(post.content, fixtures::seeded_content(id));
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_counting_store_counts_per_id() {
        let store = CountingStore::new(fixtures::seeded_store(1..=3));
        store.fetch(PostId::new(1)).await.unwrap();
        store.fetch(PostId::new(1)).await.unwrap();
        store.fetch(PostId::new(2)).await.unwrap();
        assert!(store.fetch(PostId::new(9)).await.is_err());

        assert_eq!(store.total_calls(), 4);
        assert_eq!(store.calls_for(1), 2);
        assert_eq!(store.calls_for(2), 1);
        assert_eq!(store.calls_for(3), 0);
        assert_eq!(store.calls_for(9), 1);
    }

    #[tokio::test]
    async fn test_flaky_store_recovers() {
        let store = FlakyStore::new(fixtures::seeded_store([1]), 2);
        assert!(store.fetch(PostId::new(1)).await.is_err());
        assert!(store.fetch(PostId::new(1)).await.is_err());
        assert_eq!(store.remaining_failures(), 0);
        assert!(store.fetch(PostId::new(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_eventually_times_out() {
        let observed = eventually(Duration::from_millis(20), Duration::from_millis(5), || false).await;
        assert!(!observed);
    }

    #[tokio::test]
    async fn test_eventually_sees_condition() {
        let mut polls = 0;
        let observed = eventually(Duration::from_secs(1), Duration::from_millis(1), || {
            polls += 1;
            polls >= 3
        })
        .await;
        assert!(observed);
    }

    #[tokio::test]
    async fn test_assertions_on_repository_results() {
        let (repo, _store) = fixtures::counting_repository(1..=2);
        let hit = repo.get_post_by_id(1).await;
        assertions::assert_seeded_post(&hit.unwrap(), 1);

        let missing = repo.get_post_by_id(7).await;
        assertions::assert_not_found(&missing, 7);
    }

    proptest! {
        #[test]
        fn test_arb_distinct_ids_are_distinct(ids in generators::arb_distinct_ids(50)) {
            let mut sorted = ids.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), ids.len());
        }

        #[test]
        fn test_arb_post_content_is_bounded(post in generators::arb_post()) {
            prop_assert!(post.content.chars().count() <= 120);
        }
    }
}
