// Feed Repository Port (read-only view used by the refresh engine)

use crate::domain::{Feed, FeedId};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Find feed by ID (`AppError::NotFound` when absent)
    async fn get_by_id(&self, feed_id: FeedId) -> Result<Feed>;

    /// Feeds that have no refresh job yet, oldest first
    async fn list_unscheduled(&self, limit: i64) -> Result<Vec<Feed>>;
}
