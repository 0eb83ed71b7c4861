// Refresh worker - claims due jobs, fetches their feeds and records the outcome
use crate::application::retry::RetryPolicy;
use crate::application::settings::{run_at, RefreshSettings};
use crate::application::worker::BackgroundTask;
use crate::domain::{
    FeedRefreshJob, FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState,
    FeedRefreshJobUpdates,
};
use crate::error::{AppError, Result};
use crate::port::{
    atomic, FeedContentFetcher, FeedPostRepository, FeedRefreshJobRepository, FeedRepository,
    TimeProvider, TransactionalFeedRefreshJobRepository,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters for one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Jobs this worker moved to `in_progress`
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs whose outcome could not be recorded (left for recovery)
    pub skipped: usize,
    pub posts_inserted: u64,
}

enum JobOutcome {
    Completed { posts_inserted: u64 },
    Failed,
    Skipped,
}

/// Refresh use case
pub struct UpdateFeedContent {
    job_repo: Arc<dyn FeedRefreshJobRepository>,
    tx_repo: Arc<dyn TransactionalFeedRefreshJobRepository>,
    feed_repo: Arc<dyn FeedRepository>,
    fetcher: Arc<dyn FeedContentFetcher>,
    post_repo: Arc<dyn FeedPostRepository>,
    time_provider: Arc<dyn TimeProvider>,
    retry_policy: RetryPolicy,
    settings: RefreshSettings,
}

impl UpdateFeedContent {
    pub fn new(
        job_repo: Arc<dyn FeedRefreshJobRepository>,
        tx_repo: Arc<dyn TransactionalFeedRefreshJobRepository>,
        feed_repo: Arc<dyn FeedRepository>,
        fetcher: Arc<dyn FeedContentFetcher>,
        post_repo: Arc<dyn FeedPostRepository>,
        time_provider: Arc<dyn TimeProvider>,
        settings: RefreshSettings,
    ) -> Self {
        let retry_policy = RetryPolicy::new(settings.retry_base_delay, settings.retry_max_delay);
        Self {
            job_repo,
            tx_repo,
            feed_repo,
            fetcher,
            post_repo,
            time_provider,
            retry_policy,
            settings,
        }
    }

    /// Run one refresh cycle
    ///
    /// 1. List due `pending` jobs (oldest `execute_after` first)
    /// 2. Claim them with a skip-locked batch transition in its own transaction
    /// 3. Fetch and persist posts with bounded concurrency
    /// 4. Record each outcome in a second short transaction
    ///
    /// No row lock is held while a feed is being fetched.
    pub async fn run_cycle(&self) -> Result<RefreshSummary> {
        let now = self.time_provider.now();
        let filter = FeedRefreshJobFiltering::default()
            .state(FeedRefreshJobState::Pending)
            .execute_before(now);
        let due = self
            .job_repo
            .get_list(
                FeedRefreshJobOrdering::ExecuteAfterAsc,
                Some(&filter),
                self.settings.batch_size,
                0,
            )
            .await?;

        if due.is_empty() {
            return Ok(RefreshSummary::default());
        }

        let ids: Vec<_> = due.iter().map(|job| job.id).collect();
        let claimed = atomic(self.tx_repo.as_ref(), move |tx| {
            Box::pin(async move {
                tx.transit_state_batch(
                    &ids,
                    FeedRefreshJobState::Pending,
                    FeedRefreshJobState::InProgress,
                )
                .await
            })
        })
        .await?;

        debug!(listed = %due.len(), claimed = %claimed.len(), "Claimed refresh jobs");

        let mut summary = RefreshSummary {
            claimed: claimed.len(),
            ..RefreshSummary::default()
        };

        let outcomes: Vec<JobOutcome> = stream::iter(claimed)
            .map(|job| self.process(job))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                JobOutcome::Completed { posts_inserted } => {
                    summary.completed += 1;
                    summary.posts_inserted += posts_inserted;
                }
                JobOutcome::Failed => summary.failed += 1,
                JobOutcome::Skipped => summary.skipped += 1,
            }
        }

        if summary.claimed > 0 {
            info!(
                claimed = %summary.claimed,
                completed = %summary.completed,
                failed = %summary.failed,
                skipped = %summary.skipped,
                posts_inserted = %summary.posts_inserted,
                "Refresh cycle finished"
            );
        }
        Ok(summary)
    }

    async fn process(&self, job: FeedRefreshJob) -> JobOutcome {
        let job_id = job.id;
        let recorded = match self.refresh_content(&job).await {
            Ok(posts_inserted) => self
                .complete(&job)
                .await
                .map(|_| JobOutcome::Completed { posts_inserted }),
            Err(e) => {
                warn!(job_id = %job_id, feed_id = %job.feed_id, error = %e, "Feed refresh failed");
                self.fail(&job).await.map(|_| JobOutcome::Failed)
            }
        };

        match recorded {
            Ok(outcome) => outcome,
            Err(e) if e.is_state_transition() => {
                warn!(job_id = %job_id, "Job changed state during refresh, outcome dropped");
                JobOutcome::Skipped
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to record refresh outcome");
                JobOutcome::Skipped
            }
        }
    }

    /// Fetch the feed and store new posts; returns how many were inserted
    async fn refresh_content(&self, job: &FeedRefreshJob) -> Result<u64> {
        let feed = self.feed_repo.get_by_id(job.feed_id).await?;

        // Isolate the fetcher so a panic fails this job instead of the worker
        let fetcher = Arc::clone(&self.fetcher);
        let url = feed.url.clone();
        let fetched = tokio::spawn(async move { fetcher.fetch(&url).await }).await;

        let posts = match fetched {
            Ok(result) => result?,
            Err(join_err) => {
                return Err(AppError::Internal(format!(
                    "Fetcher task aborted: {}",
                    join_err
                )));
            }
        };

        let inserted = self.post_repo.persist_new(feed.id, &posts).await?;
        debug!(
            job_id = %job.id,
            feed_id = %feed.id,
            fetched = %posts.len(),
            inserted = %inserted,
            "Feed content stored"
        );
        Ok(inserted)
    }

    async fn complete(&self, job: &FeedRefreshJob) -> Result<FeedRefreshJob> {
        let updates = FeedRefreshJobUpdates::default()
            .execute_after(run_at(self.time_provider.now(), self.settings.refresh_interval)?)
            .retries(0);
        self.finalize(job, FeedRefreshJobState::Completed, updates)
            .await
    }

    async fn fail(&self, job: &FeedRefreshJob) -> Result<FeedRefreshJob> {
        let delay = self.retry_policy.backoff(job);
        let updates = FeedRefreshJobUpdates::default()
            .execute_after(run_at(self.time_provider.now(), delay)?)
            .retries(job.retries.saturating_add(1));
        self.finalize(job, FeedRefreshJobState::Failed, updates)
            .await
    }

    /// Move the job out of `in_progress` and set its next run atomically
    async fn finalize(
        &self,
        job: &FeedRefreshJob,
        new_state: FeedRefreshJobState,
        updates: FeedRefreshJobUpdates,
    ) -> Result<FeedRefreshJob> {
        let job_id = job.id;
        atomic(self.tx_repo.as_ref(), move |tx| {
            Box::pin(async move {
                tx.transit_state(job_id, FeedRefreshJobState::InProgress, new_state)
                    .await?;
                tx.update(job_id, &updates).await
            })
        })
        .await
    }
}

#[async_trait]
impl BackgroundTask for UpdateFeedContent {
    fn name(&self) -> &'static str {
        "refresh"
    }

    async fn run_once(&self) -> Result<usize> {
        Ok(self.run_cycle().await?.claimed)
    }
}
