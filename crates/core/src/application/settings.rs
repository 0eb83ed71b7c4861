// Refresh settings (plain values, loaded by the composition root)

use crate::application::worker::constants::*;
use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, Utc};

/// Timing and sizing knobs shared by the refresh use cases
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Delay before a newly scheduled feed becomes due
    pub initial_delay: Duration,
    /// Delay between successful refreshes
    pub refresh_interval: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// In-progress jobs older than this are handed back to `pending`
    pub stale_after: Duration,
    /// Jobs listed and claimed per cycle
    pub batch_size: i64,
    /// Claimed jobs processed concurrently
    pub concurrency: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::seconds(DEFAULT_INITIAL_DELAY_SECS),
            refresh_interval: Duration::seconds(DEFAULT_REFRESH_INTERVAL_SECS),
            retry_base_delay: Duration::seconds(DEFAULT_RETRY_BASE_DELAY_SECS),
            retry_max_delay: Duration::seconds(DEFAULT_RETRY_MAX_DELAY_SECS),
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// `now + delay`, failing instead of overflowing the timestamp range
pub fn run_at(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(delay).ok_or_else(|| {
        AppError::Validation(format!("Delay of {} from {} is out of range", delay, now))
    })
}
