// Domain Error Types

use super::{FeedId, FeedRefreshJobState, JobId};
use thiserror::Error;

/// Refresh job failures visible to use cases
///
/// Storage errors never leak past the repository boundary: adapters translate
/// constraint violations into these variants or into `AppError::Database`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshJobError {
    /// Lookup or update matched no row
    #[error("Refresh job not found: {0}")]
    NotFound(String),

    /// The referenced feed does not exist (permanent)
    #[error("Referenced feed does not exist: {feed_id}")]
    NoFeed { feed_id: FeedId },

    /// Compare-and-swap guard failed; the caller must re-read and decide
    #[error("Failed to transit refresh job {job_id} from {from} to {to}")]
    StateTransition {
        job_id: JobId,
        from: FeedRefreshJobState,
        to: FeedRefreshJobState,
    },
}

impl RefreshJobError {
    pub fn not_found_by(field: &str, value: impl std::fmt::Display) -> Self {
        RefreshJobError::NotFound(format!("Refresh job with {} {} not found", field, value))
    }
}
