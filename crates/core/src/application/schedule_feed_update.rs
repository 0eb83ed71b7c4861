// Scheduler - makes sure every feed has a refresh job and finished jobs come back
use crate::application::settings::{run_at, RefreshSettings};
use crate::application::worker::BackgroundTask;
use crate::domain::{FeedId, FeedRefreshJob, FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState, NewFeedRefreshJob};
use crate::error::Result;
use crate::port::{FeedRefreshJobRepository, FeedRepository, TimeProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const RESCHEDULABLE_STATES: [FeedRefreshJobState; 2] =
    [FeedRefreshJobState::Completed, FeedRefreshJobState::Failed];

/// Schedule feed refreshes
pub struct ScheduleFeedUpdate {
    job_repo: Arc<dyn FeedRefreshJobRepository>,
    feed_repo: Arc<dyn FeedRepository>,
    time_provider: Arc<dyn TimeProvider>,
    settings: RefreshSettings,
}

impl ScheduleFeedUpdate {
    pub fn new(
        job_repo: Arc<dyn FeedRefreshJobRepository>,
        feed_repo: Arc<dyn FeedRepository>,
        time_provider: Arc<dyn TimeProvider>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            job_repo,
            feed_repo,
            time_provider,
            settings,
        }
    }

    /// Ensure `feed_id` has a refresh job
    ///
    /// Idempotent: an existing job is returned unchanged.
    pub async fn schedule(&self, feed_id: FeedId) -> Result<FeedRefreshJob> {
        let execute_after = run_at(self.time_provider.now(), self.settings.initial_delay)?;
        let job = self
            .job_repo
            .get_or_create(&NewFeedRefreshJob::new(feed_id, execute_after))
            .await?;

        debug!(job_id = %job.id, feed_id = %feed_id, state = %job.state, "Feed scheduled");
        Ok(job)
    }

    /// Create jobs for feeds that have none
    pub async fn schedule_unscheduled(&self, limit: i64) -> Result<usize> {
        let feeds = self.feed_repo.list_unscheduled(limit).await?;
        let mut scheduled = 0;

        for feed in feeds {
            self.schedule(feed.id).await?;
            scheduled += 1;
        }

        if scheduled > 0 {
            info!(scheduled = %scheduled, "Scheduled new feeds");
        }
        Ok(scheduled)
    }

    /// Move finished jobs whose next run is due back to `pending`
    ///
    /// Rows locked by another transaction are skipped and picked up next pass.
    pub async fn reschedule_finished(&self, limit: i64) -> Result<usize> {
        let now = self.time_provider.now();
        let mut requeued = 0;

        for state in RESCHEDULABLE_STATES {
            let filter = FeedRefreshJobFiltering::default()
                .state(state)
                .execute_before(now);
            let due = self
                .job_repo
                .get_list(FeedRefreshJobOrdering::ExecuteAfterAsc, Some(&filter), limit, 0)
                .await?;
            if due.is_empty() {
                continue;
            }

            let ids: Vec<_> = due.iter().map(|job| job.id).collect();
            let moved = self
                .job_repo
                .transit_state_batch(&ids, state, FeedRefreshJobState::Pending)
                .await?;

            debug!(
                from = %state,
                listed = %ids.len(),
                requeued = %moved.len(),
                "Requeued finished jobs"
            );
            requeued += moved.len();
        }

        if requeued > 0 {
            info!(requeued = %requeued, "Rescheduled finished jobs");
        }
        Ok(requeued)
    }
}

#[async_trait]
impl BackgroundTask for ScheduleFeedUpdate {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run_once(&self) -> Result<usize> {
        let limit = self.settings.batch_size;
        let scheduled = self.schedule_unscheduled(limit).await?;
        let requeued = self.reschedule_finished(limit).await?;
        Ok(scheduled + requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RefreshJobError;
    use crate::error::AppError;
    use crate::port::mocks::{InMemoryFeedRefreshJobRepository, InMemoryFeedRepository, ManualTimeProvider};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        clock: Arc<ManualTimeProvider>,
        jobs: InMemoryFeedRefreshJobRepository,
        feeds: Arc<InMemoryFeedRepository>,
        scheduler: ScheduleFeedUpdate,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualTimeProvider::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ));
        let jobs = InMemoryFeedRefreshJobRepository::new(clock.clone());
        let feeds = Arc::new(InMemoryFeedRepository::new(jobs.clone()));
        let settings = RefreshSettings {
            initial_delay: Duration::minutes(5),
            ..RefreshSettings::default()
        };
        let scheduler = ScheduleFeedUpdate::new(
            Arc::new(jobs.clone()),
            feeds.clone(),
            clock.clone(),
            settings,
        );
        Fixture {
            clock,
            jobs,
            feeds,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_schedule_creates_pending_job() {
        let f = fixture();
        f.feeds.add_feed(1, "https://example.com/rss");

        let job = f.scheduler.schedule(1).await.unwrap();

        assert_eq!(job.feed_id, 1);
        assert_eq!(job.state, FeedRefreshJobState::Pending);
        assert_eq!(job.execute_after, f.clock.now() + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let f = fixture();
        f.feeds.add_feed(1, "https://example.com/rss");

        let first = f.scheduler.schedule(1).await.unwrap();
        f.clock.advance(Duration::hours(1));
        let second = f.scheduler.schedule(1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.jobs.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_unknown_feed() {
        let f = fixture();

        let err = f.scheduler.schedule(99).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::RefreshJob(RefreshJobError::NoFeed { feed_id: 99 })
        ));
    }

    #[tokio::test]
    async fn test_schedule_unscheduled_covers_new_feeds_only() {
        let f = fixture();
        f.feeds.add_feed(1, "https://a.example.com/rss");
        f.feeds.add_feed(2, "https://b.example.com/rss");
        f.scheduler.schedule(1).await.unwrap();

        assert_eq!(f.scheduler.schedule_unscheduled(10).await.unwrap(), 1);
        assert_eq!(f.scheduler.schedule_unscheduled(10).await.unwrap(), 0);
        assert_eq!(f.jobs.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_reschedule_finished_requeues_due_jobs() {
        let f = fixture();
        let now = f.clock.now();
        let base = FeedRefreshJob {
            id: 1,
            feed_id: 1,
            state: FeedRefreshJobState::Completed,
            execute_after: now - Duration::minutes(1),
            retries: 0,
            state_changed_at: now - Duration::hours(1),
        };
        f.jobs.put(base.clone());
        f.jobs.put(FeedRefreshJob {
            id: 2,
            feed_id: 2,
            state: FeedRefreshJobState::Failed,
            retries: 2,
            ..base.clone()
        });
        // Not due yet
        f.jobs.put(FeedRefreshJob {
            id: 3,
            feed_id: 3,
            execute_after: now + Duration::minutes(30),
            ..base.clone()
        });

        let requeued = f.scheduler.reschedule_finished(10).await.unwrap();

        assert_eq!(requeued, 2);
        let states: Vec<_> = f.jobs.snapshot().into_iter().map(|job| job.state).collect();
        assert_eq!(
            states,
            vec![
                FeedRefreshJobState::Pending,
                FeedRefreshJobState::Pending,
                FeedRefreshJobState::Completed,
            ]
        );
        // Retry count survives the requeue
        assert_eq!(f.jobs.get_by_id(2).await.unwrap().retries, 2);
    }

    #[tokio::test]
    async fn test_reschedule_skips_locked_job() {
        let f = fixture();
        let now = f.clock.now();
        f.jobs.put(FeedRefreshJob {
            id: 1,
            feed_id: 1,
            state: FeedRefreshJobState::Completed,
            execute_after: now - Duration::minutes(1),
            retries: 0,
            state_changed_at: now - Duration::hours(1),
        });

        let guard = f.jobs.hold_row_lock(1).await.unwrap();
        assert_eq!(f.scheduler.reschedule_finished(10).await.unwrap(), 0);
        drop(guard);

        assert_eq!(f.scheduler.reschedule_finished(10).await.unwrap(), 1);
    }
}
