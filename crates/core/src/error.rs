// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    RefreshJob(#[from] crate::domain::RefreshJobError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crate::port::FetchError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for a failed compare-and-swap (another worker got there first)
    pub fn is_state_transition(&self) -> bool {
        matches!(
            self,
            AppError::RefreshJob(crate::domain::RefreshJobError::StateTransition { .. })
        )
    }

    pub fn is_job_not_found(&self) -> bool {
        matches!(
            self,
            AppError::RefreshJob(crate::domain::RefreshJobError::NotFound(_))
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-postgres crate
// by classifying constraint violations before falling back to AppError::Database
