// Port Layer - Interfaces for external dependencies

pub mod feed_content;
pub mod feed_post_repository;
pub mod feed_refresh_job_repository;
pub mod feed_repository;
pub mod mocks;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use feed_content::{FeedContentFetcher, FetchError};
pub use feed_post_repository::FeedPostRepository;
pub use feed_refresh_job_repository::FeedRefreshJobRepository;
pub use feed_repository::FeedRepository;
pub use time_provider::TimeProvider;
pub use transaction::{
    atomic, FeedRefreshJobTransaction, Transaction, TransactionalFeedRefreshJobRepository,
};
