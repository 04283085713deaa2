//! Walks through the cache lifecycle against an in-memory store.
//!
//! Run with `cargo run -p postcache-storage --features demo --bin postcache-demo`;
//! set `RUST_LOG=postcache_storage=trace` for per-lookup logging.

use std::time::Duration;

use postcache_core::{now, Post, PostCacheError, RepositoryConfig, SweeperConfig};
use postcache_storage::{
    CacheKey, InMemoryPostStore, PostRepository, SweeperHandle, WeakCacheTable,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("postcache_storage=debug,info"));

    // A second init (e.g. under a test harness) is harmless.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

async fn demo_reclamation(store: InMemoryPostStore) -> Result<(), PostCacheError> {
    let repo = PostRepository::new(store, RepositoryConfig::without_sweeper())?;

    let first = repo.get_post_by_id(1).await?;
    let second = repo.get_post_by_id(1).await?;
    tracing::info!(
        post_id = %first.id,
        content = %first.content,
        first_hit = first.was_cache_hit(),
        second_hit = second.was_cache_hit(),
        "Fetched post twice"
    );

    drop(first);
    drop(second);

    let mut polls = 0u32;
    while !repo.is_empty() && polls < 50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        polls += 1;
    }
    tracing::info!(
        is_empty = repo.is_empty(),
        polls,
        stats = ?repo.stats(),
        "Handles dropped"
    );

    if let Err(err) = repo.get_post_by_id(404).await {
        tracing::info!(error = %err, not_found = err.is_not_found(), "Unknown post");
    }

    Ok(())
}

async fn demo_sweeper() -> Result<(), PostCacheError> {
    let table: WeakCacheTable<Post> = WeakCacheTable::new();
    let base = now();
    let keys: Vec<CacheKey> = [(30, 3), (10, 1), (20, 2)]
        .into_iter()
        .map(|(id, offset_ms)| {
            CacheKey::with_created_at(id, base + chrono::Duration::milliseconds(offset_ms))
        })
        .collect();
    for key in &keys {
        table.put(key, Post::new(key.id(), format!("post {}", key.id())));
    }

    let config = SweeperConfig::new()
        .with_period(Duration::from_millis(200))
        .with_initial_delay(Duration::from_millis(100));
    let sweeper = SweeperHandle::spawn(table.clone(), config)?;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let remaining: Vec<i64> = table.keys().iter().map(|k| k.id().as_i64()).collect();
    tracing::info!(?remaining, "After first sweep");

    let snapshot = sweeper.shutdown().await;
    tracing::info!(?snapshot, "Sweeper stopped");

    drop(keys);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), PostCacheError> {
    init_tracing();

    let store =
        InMemoryPostStore::with_posts((1..=5).map(|id| Post::new(id, format!("post {id}"))));

    demo_reclamation(store).await?;
    demo_sweeper().await?;
    Ok(())
}
