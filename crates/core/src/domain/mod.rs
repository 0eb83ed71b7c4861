// Domain Layer - Pure business logic and entities

pub mod error;
pub mod feed;
pub mod feed_refresh_job;

// Re-exports
pub use error::RefreshJobError;
pub use feed::{Feed, FeedId, NewFeedPost};
pub use feed_refresh_job::{
    FeedRefreshJob, FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState,
    FeedRefreshJobUpdates, JobId, NewFeedRefreshJob,
};
