// sqlx::Error -> AppError translation

use feedrefresh_core::error::AppError;
use sqlx::error::ErrorKind;

/// Unique constraint on `feed_refresh_jobs.feed_id`
pub const FEED_ID_UNIQUE: &str = "feed_refresh_jobs_feed_id_key";

/// Foreign key from `feed_refresh_jobs.feed_id` to `feeds.id`
pub const FEED_ID_FOREIGN_KEY: &str = "feed_refresh_jobs_feed_id_fkey";

/// Constraint violations the job repository knows how to translate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    /// A job for this feed already exists
    DuplicateFeedJob,
    /// The referenced feed does not exist
    MissingFeed,
}

/// Classify a storage constraint violation
///
/// Only the two named constraints are recognized. Anything else returns
/// `None` and must be surfaced unchanged.
pub fn classify_violation(kind: ErrorKind, constraint: Option<&str>) -> Option<ConstraintViolation> {
    match (kind, constraint) {
        (ErrorKind::UniqueViolation, Some(FEED_ID_UNIQUE)) => {
            Some(ConstraintViolation::DuplicateFeedJob)
        }
        (ErrorKind::ForeignKeyViolation, Some(FEED_ID_FOREIGN_KEY)) => {
            Some(ConstraintViolation::MissingFeed)
        }
        _ => None,
    }
}

/// Classify a driver error, if it is a recognized constraint violation
pub(crate) fn constraint_violation(err: &sqlx::Error) -> Option<ConstraintViolation> {
    match err {
        sqlx::Error::Database(db_err) => classify_violation(db_err.kind(), db_err.constraint()),
        _ => None,
    }
}

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            match (db_err.kind(), db_err.constraint()) {
                (ErrorKind::UniqueViolation, Some(constraint)) => AppError::Database(format!(
                    "Unique constraint violation on {}: {} ({})",
                    constraint,
                    db_err.message(),
                    code
                )),
                (ErrorKind::ForeignKeyViolation, Some(constraint)) => {
                    AppError::Database(format!(
                        "Foreign key constraint violation on {}: {} ({})",
                        constraint,
                        db_err.message(),
                        code
                    ))
                }
                (ErrorKind::CheckViolation, Some(constraint)) => AppError::Database(format!(
                    "Check constraint violation on {}: {} ({})",
                    constraint,
                    db_err.message(),
                    code
                )),
                _ => AppError::Database(format!(
                    "Database error [{}]: {}",
                    code,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        sqlx::Error::PoolTimedOut => {
            AppError::Database("Timed out waiting for a database connection".to_string())
        }
        _ => {
            // Connection, protocol, configuration errors
            AppError::Database(err.to_string())
        }
    }
}
