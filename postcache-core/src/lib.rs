//! postcache Core - Entity Types
//!
//! Pure data structures shared by the cache layer: post identity, the post
//! entity itself, the error taxonomy and the sweeper configuration.
//! This crate contains ONLY data types - no caching logic.

pub mod config;
pub mod constants;
pub mod entities;
pub mod error;
pub mod identity;

pub use config::{RepositoryConfig, SweeperConfig};
pub use entities::Post;
pub use error::{ConfigError, PostCacheError, PostCacheResult, StoreError, SweeperError};
pub use identity::{now, PostId, Timestamp};
