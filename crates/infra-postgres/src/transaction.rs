// PostgreSQL Transaction Implementation

use crate::error::map_sqlx_error;
use crate::job_queries;
use async_trait::async_trait;
use feedrefresh_core::domain::{
    FeedId, FeedRefreshJob, FeedRefreshJobState, FeedRefreshJobUpdates, JobId, NewFeedRefreshJob,
};
use feedrefresh_core::error::Result;
use feedrefresh_core::port::{FeedRefreshJobTransaction, TimeProvider, Transaction};
use sqlx::{Postgres, Transaction as SqlxTransaction};
use std::sync::Arc;

/// Open transaction on the job table
///
/// Dropping it without commit rolls back (sqlx issues ROLLBACK on drop).
pub struct PostgresJobTransaction {
    tx: SqlxTransaction<'static, Postgres>,
    time_provider: Arc<dyn TimeProvider>,
}

impl PostgresJobTransaction {
    pub fn new(tx: SqlxTransaction<'static, Postgres>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { tx, time_provider }
    }
}

#[async_trait]
impl Transaction for PostgresJobTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl FeedRefreshJobTransaction for PostgresJobTransaction {
    async fn get_by_id(&mut self, job_id: JobId) -> Result<FeedRefreshJob> {
        job_queries::get_by_id(&mut self.tx, job_id).await
    }

    async fn get_by_feed_id(&mut self, feed_id: FeedId) -> Result<FeedRefreshJob> {
        job_queries::get_by_feed_id(&mut self.tx, feed_id).await
    }

    async fn get_or_create(&mut self, new_job: &NewFeedRefreshJob) -> Result<FeedRefreshJob> {
        let now = self.time_provider.now();
        job_queries::get_or_create(&mut self.tx, new_job, now).await
    }

    async fn update(
        &mut self,
        job_id: JobId,
        updates: &FeedRefreshJobUpdates,
    ) -> Result<FeedRefreshJob> {
        job_queries::update(&mut self.tx, job_id, updates).await
    }

    async fn transit_state(
        &mut self,
        job_id: JobId,
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<FeedRefreshJob> {
        let now = self.time_provider.now();
        job_queries::transit_state(&mut self.tx, job_id, old_state, new_state, now).await
    }

    async fn transit_state_batch(
        &mut self,
        job_ids: &[JobId],
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<Vec<FeedRefreshJob>> {
        let now = self.time_provider.now();
        job_queries::transit_state_batch(&mut self.tx, job_ids, old_state, new_state, now).await
    }
}
