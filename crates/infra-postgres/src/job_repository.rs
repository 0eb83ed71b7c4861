// PostgreSQL FeedRefreshJobRepository Implementation

use crate::error::map_sqlx_error;
use crate::job_queries;
use crate::PostgresJobTransaction;
use async_trait::async_trait;
use feedrefresh_core::domain::{
    FeedId, FeedRefreshJob, FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState,
    FeedRefreshJobUpdates, JobId, NewFeedRefreshJob,
};
use feedrefresh_core::error::Result;
use feedrefresh_core::port::{
    FeedRefreshJobRepository, FeedRefreshJobTransaction, TimeProvider,
    TransactionalFeedRefreshJobRepository,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Pooled job repository
///
/// Reads use a plain pooled connection; every write runs in its own short
/// transaction so row locks are released when the call returns.
#[derive(Clone)]
pub struct PostgresFeedRefreshJobRepository {
    pool: PgPool,
    time_provider: Arc<dyn TimeProvider>,
}

impl PostgresFeedRefreshJobRepository {
    pub fn new(pool: PgPool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl FeedRefreshJobRepository for PostgresFeedRefreshJobRepository {
    async fn get_by_id(&self, job_id: JobId) -> Result<FeedRefreshJob> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        job_queries::get_by_id(&mut conn, job_id).await
    }

    async fn get_by_feed_id(&self, feed_id: FeedId) -> Result<FeedRefreshJob> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        job_queries::get_by_feed_id(&mut conn, feed_id).await
    }

    async fn get_or_create(&self, new_job: &NewFeedRefreshJob) -> Result<FeedRefreshJob> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let job = job_queries::get_or_create(&mut tx, new_job, self.time_provider.now()).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(job)
    }

    async fn get_list(
        &self,
        order_by: FeedRefreshJobOrdering,
        filter_by: Option<&FeedRefreshJobFiltering>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FeedRefreshJob>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        job_queries::get_list(&mut conn, order_by, filter_by, limit, offset).await
    }

    async fn update(
        &self,
        job_id: JobId,
        updates: &FeedRefreshJobUpdates,
    ) -> Result<FeedRefreshJob> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let job = job_queries::update(&mut tx, job_id, updates).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(job)
    }

    async fn transit_state(
        &self,
        job_id: JobId,
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<FeedRefreshJob> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let job = job_queries::transit_state(
            &mut tx,
            job_id,
            old_state,
            new_state,
            self.time_provider.now(),
        )
        .await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(job)
    }

    async fn transit_state_batch(
        &self,
        job_ids: &[JobId],
        old_state: FeedRefreshJobState,
        new_state: FeedRefreshJobState,
    ) -> Result<Vec<FeedRefreshJob>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let jobs = job_queries::transit_state_batch(
            &mut tx,
            job_ids,
            old_state,
            new_state,
            self.time_provider.now(),
        )
        .await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(jobs)
    }
}

#[async_trait]
impl TransactionalFeedRefreshJobRepository for PostgresFeedRefreshJobRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn FeedRefreshJobTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PostgresJobTransaction::new(
            tx,
            Arc::clone(&self.time_provider),
        )))
    }
}
