// Retry backoff for failed refreshes
use crate::domain::FeedRefreshJob;
use chrono::Duration;
use tracing::info;

/// Capped exponential backoff
///
/// delay = min(base * 2^retries, max) * jitter, with jitter in [0.9, 1.1]
/// derived from the job id so every job gets a stable offset.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(Duration::minutes(1), Duration::hours(6));
    /// let delay = policy.backoff(&job);
    /// ```
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before the next attempt of a job that just failed
    pub fn backoff(&self, job: &FeedRefreshJob) -> Duration {
        let base_ms = self.base_delay.num_milliseconds() as f64;
        let max_ms = self.max_delay.num_milliseconds() as f64;

        // Clamp the exponent so the float never overflows
        let exponent = job.retries.clamp(0, 30);
        let raw_ms = (base_ms * 2f64.powi(exponent)).min(max_ms);

        // Spread retries of many feeds that failed together
        let jitter_seed = job.id.unsigned_abs() % 21;
        let jitter_factor = 0.9 + (jitter_seed as f64 / 100.0);

        let delay = Duration::try_milliseconds((raw_ms * jitter_factor).round() as i64)
            .unwrap_or(self.max_delay);

        info!(
            job_id = %job.id,
            retries = %job.retries,
            delay_ms = %delay.num_milliseconds(),
            "Scheduling retry"
        );

        delay
    }
}
