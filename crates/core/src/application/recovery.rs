// Stale job recovery - hands abandoned in-progress jobs back to the queue
use crate::application::settings::RefreshSettings;
use crate::application::worker::constants::RECOVERY_PAGE_SIZE;
use crate::application::worker::BackgroundTask;
use crate::domain::{FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState};
use crate::error::{AppError, Result};
use crate::port::{FeedRefreshJobRepository, TimeProvider};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

/// Stale job recovery service
///
/// A job stays `in_progress` only while its worker is alive. When a worker
/// dies mid-refresh the row is never finalized; once its `state_changed_at`
/// is older than `stale_after` it is moved back to `pending`.
pub struct RecoveryService {
    job_repo: Arc<dyn FeedRefreshJobRepository>,
    time_provider: Arc<dyn TimeProvider>,
    stale_after: Duration,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// # Example
    /// ```ignore
    /// let recovery = RecoveryService::new(job_repo, time_provider, &settings);
    /// recovery.recover_stale_jobs().await?;
    /// ```
    pub fn new(
        job_repo: Arc<dyn FeedRefreshJobRepository>,
        time_provider: Arc<dyn TimeProvider>,
        settings: &RefreshSettings,
    ) -> Self {
        Self {
            job_repo,
            time_provider,
            stale_after: settings.stale_after,
        }
    }

    /// Recover stale jobs
    ///
    /// # Returns
    /// Number of jobs moved back to `pending`
    pub async fn recover_stale_jobs(&self) -> Result<usize> {
        let now = self.time_provider.now();
        let cutoff = now.checked_sub_signed(self.stale_after).ok_or_else(|| {
            AppError::Validation(format!(
                "Stale cutoff {} before {} is out of range",
                self.stale_after, now
            ))
        })?;
        let filter = FeedRefreshJobFiltering::default()
            .state(FeedRefreshJobState::InProgress)
            .state_changed_before(cutoff);

        let mut recovered = 0;
        let mut skipped = 0;

        loop {
            let page = self
                .job_repo
                .get_list(
                    FeedRefreshJobOrdering::StateChangedAtAsc,
                    Some(&filter),
                    RECOVERY_PAGE_SIZE,
                    0,
                )
                .await?;
            let page_len = page.len() as i64;

            for job in page {
                match self
                    .job_repo
                    .transit_state(
                        job.id,
                        FeedRefreshJobState::InProgress,
                        FeedRefreshJobState::Pending,
                    )
                    .await
                {
                    Ok(_) => {
                        info!(
                            job_id = %job.id,
                            feed_id = %job.feed_id,
                            state_changed_at = %job.state_changed_at,
                            "Recovered stale job"
                        );
                        recovered += 1;
                    }
                    Err(e) if e.is_state_transition() || e.is_job_not_found() => {
                        // Finalized or deleted since it was listed
                        warn!(job_id = %job.id, error = %e, "Stale job changed before recovery");
                        skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            // Handled rows drop out of the filter, so the next page starts at 0
            if page_len < RECOVERY_PAGE_SIZE {
                break;
            }
        }

        if recovered > 0 || skipped > 0 {
            info!(
                recovered = %recovered,
                skipped = %skipped,
                cutoff = %cutoff,
                "Stale job recovery complete"
            );
        }
        Ok(recovered)
    }
}

#[async_trait]
impl BackgroundTask for RecoveryService {
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn run_once(&self) -> Result<usize> {
        self.recover_stale_jobs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeedRefreshJob;
    use crate::port::mocks::{InMemoryFeedRefreshJobRepository, ManualTimeProvider};
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<ManualTimeProvider>, InMemoryFeedRefreshJobRepository, RecoveryService) {
        let clock = Arc::new(ManualTimeProvider::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
        ));
        let jobs = InMemoryFeedRefreshJobRepository::new(clock.clone());
        let settings = RefreshSettings {
            stale_after: Duration::minutes(15),
            ..RefreshSettings::default()
        };
        let recovery = RecoveryService::new(Arc::new(jobs.clone()), clock.clone(), &settings);
        (clock, jobs, recovery)
    }

    fn running(id: i64, since: chrono::DateTime<Utc>) -> FeedRefreshJob {
        FeedRefreshJob {
            id,
            feed_id: id,
            state: FeedRefreshJobState::InProgress,
            execute_after: since,
            retries: 0,
            state_changed_at: since,
        }
    }

    #[tokio::test]
    async fn test_recovers_only_stale_jobs() {
        let (clock, jobs, recovery) = setup();
        let now = clock.now();
        jobs.put(running(1, now - Duration::hours(1)));
        jobs.put(running(2, now - Duration::minutes(5)));

        assert_eq!(recovery.recover_stale_jobs().await.unwrap(), 1);

        assert_eq!(jobs.get_by_id(1).await.unwrap().state, FeedRefreshJobState::Pending);
        assert_eq!(jobs.get_by_id(1).await.unwrap().state_changed_at, now);
        assert_eq!(jobs.get_by_id(2).await.unwrap().state, FeedRefreshJobState::InProgress);
    }

    #[tokio::test]
    async fn test_recovery_pages_through_many_jobs() {
        let (clock, jobs, recovery) = setup();
        let total = RECOVERY_PAGE_SIZE + 5;
        for id in 1..=total {
            jobs.put(running(id, clock.now() - Duration::hours(2) + Duration::seconds(id)));
        }

        assert_eq!(recovery.recover_stale_jobs().await.unwrap(), total as usize);
        assert!(jobs
            .snapshot()
            .iter()
            .all(|job| job.state == FeedRefreshJobState::Pending));
    }

    #[tokio::test]
    async fn test_nothing_to_recover() {
        let (_clock, _jobs, recovery) = setup();
        assert_eq!(recovery.run_once().await.unwrap(), 0);
    }
}
