// Feed Post Repository Port

use crate::domain::{FeedId, NewFeedPost};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait FeedPostRepository: Send + Sync {
    /// Insert posts not stored yet; returns how many were inserted
    ///
    /// Idempotent on `(feed_id, guid)`.
    async fn persist_new(&self, feed_id: FeedId, posts: &[NewFeedPost]) -> Result<u64>;
}
