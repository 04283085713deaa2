//! Identity types for cached posts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Current wall-clock time as a [`Timestamp`].
pub fn now() -> Timestamp {
    Utc::now()
}

/// Strongly-typed post identifier.
///
/// Ordering is by the raw value; ascending id is the tie-break used when two
/// cache keys share a creation timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PostId(i64);

impl PostId {
    /// Wrap a raw identifier.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw identifier value.
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for PostId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<i32> for PostId {
    fn from(raw: i32) -> Self {
        Self(i64::from(raw))
    }
}

impl From<u32> for PostId {
    fn from(raw: u32) -> Self {
        Self(i64::from(raw))
    }
}

impl From<PostId> for i64 {
    fn from(id: PostId) -> Self {
        id.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
