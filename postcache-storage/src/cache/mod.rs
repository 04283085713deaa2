//! Weak-keyed post cache with periodic eviction.
//!
//! This module provides a read-through cache whose entries are tied to the
//! reachability of their keys rather than to explicit deletes.
//!
//! # Design Philosophy
//!
//! An entry lives while somebody outside the cache still holds its
//! [`CacheKey`]. Dropping the last handle is the invalidation: no delete call
//! is needed. Because reclamation is driven by reference counts and applied
//! lazily, callers must treat every lookup as a possible miss.
//!
//! Reclamation alone can be slow when callers hold keys for a long time, so
//! an optional [`SweeperHandle`] removes the single oldest entry on a fixed
//! period.
//!
//! # Example
//!
//! ```ignore
//! let repo = PostRepository::new(store, RepositoryConfig::default())?;
//!
//! let post = repo.get_post_by_id(1).await?;   // miss: fetched and cached
//! let again = repo.get_post_by_id(1).await?;  // hit: same entry
//!
//! drop(post);
//! drop(again);                                 // entry becomes reclaimable
//! ```

pub mod key;
pub mod repository;
pub mod sweeper;
pub mod traits;
pub mod weak_table;

pub use key::CacheKey;
pub use repository::{CachedPost, PostRepository};
pub use sweeper::{
    select_oldest, sweep_once, SweepOutcome, SweepReport, SweeperHandle, SweeperMetrics,
    SweeperSnapshot, SweeperState,
};
pub use traits::{CacheStats, PostStore};
pub use weak_table::WeakCacheTable;
