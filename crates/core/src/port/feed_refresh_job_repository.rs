// Feed Refresh Job Repository Port (Interface)

use crate::domain::{
    FeedId, FeedRefreshJob, FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState,
    FeedRefreshJobUpdates, JobId, NewFeedRefreshJob,
};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for refresh job persistence
///
/// Every method runs in its own short transaction. Use
/// [`TransactionalFeedRefreshJobRepository`](super::TransactionalFeedRefreshJobRepository)
/// when several calls must share one atomic boundary.
#[async_trait]
pub trait FeedRefreshJobRepository: Send + Sync {
    /// Find job by ID (`RefreshJobError::NotFound` when absent)
    async fn get_by_id(&self, job_id: JobId) -> Result<FeedRefreshJob>;

    /// Find the job of a feed (`RefreshJobError::NotFound` when absent)
    async fn get_by_feed_id(&self, feed_id: FeedId) -> Result<FeedRefreshJob>;

    /// Return the feed's job, inserting it first if it does not exist
    ///
    /// Concurrent callers for the same feed all observe the same row.
    /// Fails with `RefreshJobError::NoFeed` when the feed does not exist.
    async fn get_or_create(&self, new_job: &NewFeedRefreshJob) -> Result<FeedRefreshJob>;

    /// Filtered, ordered page of jobs
    async fn get_list(
        &self,
        order_by: FeedRefreshJobOrdering,
        filter_by: Option<&FeedRefreshJobFiltering>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FeedRefreshJob>>;

    /// Apply the set fields of `updates`
    async fn update(&self, job_id: JobId, updates: &FeedRefreshJobUpdates)
        -> Result<FeedRefreshJob>;

    /// Move one job from `old_state` to `new_state` under a blocking row lock
    async fn transit_state(
        &self,
        job_id: JobId,
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<FeedRefreshJob>;

    /// Move every lockable job still in `old_state` to `new_state`
    ///
    /// Rows locked by another transaction are skipped, so the result may be a
    /// strict subset of `job_ids`.
    async fn transit_state_batch(
        &self,
        job_ids: &[JobId],
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<Vec<FeedRefreshJob>>;
}
