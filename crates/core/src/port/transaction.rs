// Transaction port for atomic operations

use crate::domain::{
    FeedId, FeedRefreshJob, FeedRefreshJobState, FeedRefreshJobUpdates, JobId, NewFeedRefreshJob,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

/// Transaction trait for atomic multi-step operations
///
/// Dropping an uncommitted transaction rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transactional refresh job repository operations
#[async_trait]
pub trait TransactionalFeedRefreshJobRepository: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn FeedRefreshJobTransaction>>;
}

/// Refresh job operations within a transaction
///
/// Row locks taken here are held until commit or rollback.
#[async_trait]
pub trait FeedRefreshJobTransaction: Transaction {
    /// Find job by ID (within transaction)
    async fn get_by_id(&mut self, job_id: JobId) -> Result<FeedRefreshJob>;

    /// Find job by feed (within transaction)
    async fn get_by_feed_id(&mut self, feed_id: FeedId) -> Result<FeedRefreshJob>;

    /// Get or create (within transaction, insert isolated by a savepoint)
    async fn get_or_create(&mut self, new_job: &NewFeedRefreshJob) -> Result<FeedRefreshJob>;

    /// Partial update (within transaction)
    async fn update(
        &mut self,
        job_id: JobId,
        updates: &FeedRefreshJobUpdates,
    ) -> Result<FeedRefreshJob>;

    /// Blocking compare-and-swap (within transaction)
    async fn transit_state(
        &mut self,
        job_id: JobId,
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<FeedRefreshJob>;

    /// Skip-locked batch compare-and-swap (within transaction)
    async fn transit_state_batch(
        &mut self,
        job_ids: &[JobId],
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<Vec<FeedRefreshJob>>;
}

/// Run `f` inside one transaction
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`. A panic or
/// a cancelled future drops the transaction, which rolls back as well.
///
/// # Example
/// ```ignore
/// let claimed = atomic(repo.as_ref(), move |tx| {
///     Box::pin(async move {
///         tx.transit_state_batch(&ids, FeedRefreshJobState::Pending, FeedRefreshJobState::InProgress)
///             .await
///     })
/// })
/// .await?;
/// ```
pub async fn atomic<T, F>(repo: &dyn TransactionalFeedRefreshJobRepository, f: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Box<dyn FeedRefreshJobTransaction>) -> BoxFuture<'t, Result<T>>
        + Send,
{
    let mut tx = repo.begin_transaction().await?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed after error");
            }
            Err(err)
        }
    }
}
