// Manual refresh - make a feed due right now
use crate::domain::{FeedId, FeedRefreshJob, FeedRefreshJobState, FeedRefreshJobUpdates, NewFeedRefreshJob};
use crate::error::Result;
use crate::port::{atomic, TimeProvider, TransactionalFeedRefreshJobRepository};
use std::sync::Arc;
use tracing::info;

/// Request an immediate refresh of one feed
pub struct RefreshFeed {
    tx_repo: Arc<dyn TransactionalFeedRefreshJobRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RefreshFeed {
    pub fn new(
        tx_repo: Arc<dyn TransactionalFeedRefreshJobRepository>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            tx_repo,
            time_provider,
        }
    }

    /// Make the feed's job due now
    ///
    /// - missing job: created, due now
    /// - `completed` / `failed`: back to `pending`, due now
    /// - `pending`: due now
    /// - `in_progress`: returned untouched
    pub async fn refresh(&self, feed_id: FeedId) -> Result<FeedRefreshJob> {
        let now = self.time_provider.now();

        let job = atomic(self.tx_repo.as_ref(), move |tx| {
            Box::pin(async move {
                let job = tx
                    .get_or_create(&NewFeedRefreshJob::new(feed_id, now))
                    .await?;

                match job.state {
                    FeedRefreshJobState::InProgress => Ok(job),
                    FeedRefreshJobState::Pending => {
                        tx.update(job.id, &FeedRefreshJobUpdates::default().execute_after(now))
                            .await
                    }
                    finished => {
                        tx.transit_state(job.id, finished, FeedRefreshJobState::Pending)
                            .await?;
                        tx.update(job.id, &FeedRefreshJobUpdates::default().execute_after(now))
                            .await
                    }
                }
            })
        })
        .await?;

        info!(job_id = %job.id, feed_id = %feed_id, state = %job.state, "Manual refresh requested");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RefreshJobError;
    use crate::error::AppError;
    use crate::port::mocks::{InMemoryFeedRefreshJobRepository, ManualTimeProvider};
    use crate::port::FeedRefreshJobRepository;
    use chrono::{Duration, TimeZone, Utc};

    fn setup() -> (Arc<ManualTimeProvider>, InMemoryFeedRefreshJobRepository, RefreshFeed) {
        let clock = Arc::new(ManualTimeProvider::new(
            Utc.with_ymd_and_hms(2024, 2, 2, 2, 0, 0).unwrap(),
        ));
        let jobs = InMemoryFeedRefreshJobRepository::new(clock.clone());
        let refresh = RefreshFeed::new(Arc::new(jobs.clone()), clock.clone());
        (clock, jobs, refresh)
    }

    fn job_in(state: FeedRefreshJobState, clock: &ManualTimeProvider) -> FeedRefreshJob {
        FeedRefreshJob {
            id: 1,
            feed_id: 7,
            state,
            execute_after: clock.now() + Duration::hours(2),
            retries: 4,
            state_changed_at: clock.now() - Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_refresh_creates_missing_job() {
        let (clock, jobs, refresh) = setup();
        jobs.add_feed(7);

        let job = refresh.refresh(7).await.unwrap();

        assert_eq!(job.state, FeedRefreshJobState::Pending);
        assert_eq!(job.execute_after, clock.now());
        assert_eq!(jobs.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_requeues_failed_job() {
        let (clock, jobs, refresh) = setup();
        jobs.put(job_in(FeedRefreshJobState::Failed, &clock));

        let job = refresh.refresh(7).await.unwrap();

        assert_eq!(job.state, FeedRefreshJobState::Pending);
        assert_eq!(job.execute_after, clock.now());
        assert_eq!(job.retries, 4);
        assert_eq!(jobs.get_by_id(1).await.unwrap(), job);
    }

    #[tokio::test]
    async fn test_refresh_pulls_pending_job_forward() {
        let (clock, jobs, refresh) = setup();
        let before = job_in(FeedRefreshJobState::Pending, &clock);
        jobs.put(before.clone());

        let job = refresh.refresh(7).await.unwrap();

        assert_eq!(job.execute_after, clock.now());
        // Updates never touch the state columns
        assert_eq!(job.state_changed_at, before.state_changed_at);
    }

    #[tokio::test]
    async fn test_refresh_leaves_running_job_alone() {
        let (clock, jobs, refresh) = setup();
        let before = job_in(FeedRefreshJobState::InProgress, &clock);
        jobs.put(before.clone());

        assert_eq!(refresh.refresh(7).await.unwrap(), before);
        assert_eq!(jobs.get_by_id(1).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_refresh_unknown_feed() {
        let (_clock, jobs, refresh) = setup();

        let err = refresh.refresh(3).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::RefreshJob(RefreshJobError::NoFeed { feed_id: 3 })
        ));
        assert!(jobs.snapshot().is_empty());
    }
}
