// Feedrefresh Infrastructure - PostgreSQL Adapter
// Implements: FeedRefreshJobRepository, TransactionalFeedRefreshJobRepository,
// FeedRepository, FeedPostRepository

mod connection;
mod error;
mod feed_repository;
mod job_queries;
mod job_repository;
mod migration;
mod post_repository;
mod transaction;

pub use connection::{create_pool, create_pool_with};
pub use sqlx::PgPool;
pub use error::{classify_violation, ConstraintViolation, FEED_ID_FOREIGN_KEY, FEED_ID_UNIQUE};
pub use feed_repository::PostgresFeedRepository;
pub use job_repository::PostgresFeedRefreshJobRepository;
pub use migration::{run_migrations, MIGRATOR};
pub use post_repository::PostgresFeedPostRepository;
pub use transaction::PostgresJobTransaction;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
