// Feed Refresh Job Domain Model

use crate::domain::FeedId;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Job ID (assigned by the store)
pub type JobId = i64;

/// Refresh job lifecycle state
///
/// Transitions are always compare-and-swap through the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedRefreshJobState {
    /// Awaiting execution
    Pending,
    /// Claimed by a worker
    InProgress,
    Completed,
    /// Errored; re-queued once `execute_after` passes
    Failed,
}

impl FeedRefreshJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedRefreshJobState::Pending => "pending",
            FeedRefreshJobState::InProgress => "in_progress",
            FeedRefreshJobState::Completed => "completed",
            FeedRefreshJobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FeedRefreshJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedRefreshJobState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FeedRefreshJobState::Pending),
            "in_progress" => Ok(FeedRefreshJobState::InProgress),
            "completed" => Ok(FeedRefreshJobState::Completed),
            "failed" => Ok(FeedRefreshJobState::Failed),
            other => Err(AppError::Validation(format!(
                "Unknown refresh job state: {}",
                other
            ))),
        }
    }
}

/// Feed Refresh Job Entity (one per feed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRefreshJob {
    pub id: JobId,
    pub feed_id: FeedId,
    pub state: FeedRefreshJobState,
    pub execute_after: DateTime<Utc>,
    /// Consecutive failed attempts (drives retry backoff)
    pub retries: i32,
    pub state_changed_at: DateTime<Utc>,
}

/// Creation payload; id and state are assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeedRefreshJob {
    pub feed_id: FeedId,
    pub execute_after: DateTime<Utc>,
}

impl NewFeedRefreshJob {
    pub fn new(feed_id: FeedId, execute_after: DateTime<Utc>) -> Self {
        Self {
            feed_id,
            execute_after,
        }
    }
}

/// Partial update; `None` leaves the column untouched
///
/// State is deliberately absent: it only moves through `transit_state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRefreshJobUpdates {
    pub execute_after: Option<DateTime<Utc>>,
    pub retries: Option<i32>,
}

impl FeedRefreshJobUpdates {
    pub fn execute_after(mut self, execute_after: DateTime<Utc>) -> Self {
        self.execute_after = Some(execute_after);
        self
    }

    pub fn retries(mut self, retries: i32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.execute_after.is_none() && self.retries.is_none()
    }

    /// Apply the set fields to an in-memory snapshot
    pub fn apply_to(&self, job: &mut FeedRefreshJob) {
        if let Some(execute_after) = self.execute_after {
            job.execute_after = execute_after;
        }
        if let Some(retries) = self.retries {
            job.retries = retries;
        }
    }
}

/// Conjunctive listing predicates (all comparisons are strict)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRefreshJobFiltering {
    pub state: Option<FeedRefreshJobState>,
    pub state_changed_before: Option<DateTime<Utc>>,
    pub execute_before: Option<DateTime<Utc>>,
}

impl FeedRefreshJobFiltering {
    pub fn state(mut self, state: FeedRefreshJobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn state_changed_before(mut self, before: DateTime<Utc>) -> Self {
        self.state_changed_before = Some(before);
        self
    }

    pub fn execute_before(mut self, before: DateTime<Utc>) -> Self {
        self.execute_before = Some(before);
        self
    }

    pub fn matches(&self, job: &FeedRefreshJob) -> bool {
        self.state.map_or(true, |state| job.state == state)
            && self
                .state_changed_before
                .map_or(true, |before| job.state_changed_at < before)
            && self
                .execute_before
                .map_or(true, |before| job.execute_after < before)
    }
}

/// Listing sort strategies; ties are broken by id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedRefreshJobOrdering {
    #[default]
    IdAsc,
    ExecuteAfterAsc,
    StateChangedAtAsc,
}

impl FeedRefreshJobOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedRefreshJobOrdering::IdAsc => "id_asc",
            FeedRefreshJobOrdering::ExecuteAfterAsc => "execute_after_asc",
            FeedRefreshJobOrdering::StateChangedAtAsc => "state_changed_at_asc",
        }
    }

    pub fn compare(&self, a: &FeedRefreshJob, b: &FeedRefreshJob) -> Ordering {
        match self {
            FeedRefreshJobOrdering::IdAsc => a.id.cmp(&b.id),
            FeedRefreshJobOrdering::ExecuteAfterAsc => a
                .execute_after
                .cmp(&b.execute_after)
                .then(a.id.cmp(&b.id)),
            FeedRefreshJobOrdering::StateChangedAtAsc => a
                .state_changed_at
                .cmp(&b.state_changed_at)
                .then(a.id.cmp(&b.id)),
        }
    }
}

impl FromStr for FeedRefreshJobOrdering {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id_asc" => Ok(FeedRefreshJobOrdering::IdAsc),
            "execute_after_asc" => Ok(FeedRefreshJobOrdering::ExecuteAfterAsc),
            "state_changed_at_asc" => Ok(FeedRefreshJobOrdering::StateChangedAtAsc),
            other => Err(AppError::Validation(format!(
                "Unknown refresh job ordering: {}",
                other
            ))),
        }
    }
}
