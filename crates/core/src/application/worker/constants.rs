// Worker constants (no magic values)
use std::time::Duration;

/// Sleep duration when a pass found nothing to do (1s)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Sleep duration after worker error before retry (5s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(5);

/// Jobs claimed per refresh cycle
pub const DEFAULT_BATCH_SIZE: i64 = 20;

/// Claimed jobs processed at the same time by one worker
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Delay before a newly scheduled feed is first refreshed
pub const DEFAULT_INITIAL_DELAY_SECS: i64 = 0;

/// Delay between successful refreshes of a feed (30 minutes)
pub const DEFAULT_REFRESH_INTERVAL_SECS: i64 = 30 * 60;

/// Base delay for the first retry after a failed refresh (1 minute)
pub const DEFAULT_RETRY_BASE_DELAY_SECS: i64 = 60;

/// Upper bound for retry backoff (6 hours)
pub const DEFAULT_RETRY_MAX_DELAY_SECS: i64 = 6 * 60 * 60;

/// A job in progress for longer than this is considered stuck (15 minutes)
pub const DEFAULT_STALE_AFTER_SECS: i64 = 15 * 60;

/// Largest configurable delay (10 years)
pub const MAX_DELAY_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Page size used when scanning for stale jobs
pub const RECOVERY_PAGE_SIZE: i64 = 100;
