//! Cached entity types

use crate::PostId;
use serde::{Deserialize, Serialize};

/// A post as produced by the backing store.
///
/// Posts are immutable once fetched; the cache shares them behind `Arc`
/// and never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub content: String,
}

impl Post {
    pub fn new(id: impl Into<PostId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_new() {
        let post = Post::new(5, "hello");
        assert_eq!(post.id, PostId::new(5));
        assert_eq!(post.content, "hello");
    }

    #[test]
    fn test_post_json_shape() {
        let post = Post::new(1, "body");
        let value = serde_json::to_value(&post).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["content"], "body");
    }
}
