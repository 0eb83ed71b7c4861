// Refresh job queries over a single connection
//
// Shared by the pooled repository (each call in its own transaction) and by
// PostgresJobTransaction (calls join the caller's transaction).

use crate::error::{constraint_violation, map_sqlx_error, ConstraintViolation};
use chrono::{DateTime, Utc};
use feedrefresh_core::domain::{
    FeedId, FeedRefreshJob, FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState,
    FeedRefreshJobUpdates, JobId, NewFeedRefreshJob, RefreshJobError,
};
use feedrefresh_core::error::{AppError, Result};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, warn};

const JOB_COLUMNS: &str = "id, feed_id, state, execute_after, retries, state_changed_at";

/// Outcome of an insert attempt; never leaves this crate
enum CreateOutcome {
    Created(FeedRefreshJob),
    AlreadyExists,
}

pub(crate) async fn fetch_by_id(
    conn: &mut PgConnection,
    job_id: JobId,
) -> Result<Option<FeedRefreshJob>> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM feed_refresh_jobs WHERE id = $1",
        JOB_COLUMNS
    ))
    .bind(job_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    row.map(JobRow::into_job).transpose()
}

pub(crate) async fn fetch_by_feed_id(
    conn: &mut PgConnection,
    feed_id: FeedId,
) -> Result<Option<FeedRefreshJob>> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM feed_refresh_jobs WHERE feed_id = $1",
        JOB_COLUMNS
    ))
    .bind(feed_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    row.map(JobRow::into_job).transpose()
}

pub(crate) async fn get_by_id(conn: &mut PgConnection, job_id: JobId) -> Result<FeedRefreshJob> {
    fetch_by_id(conn, job_id)
        .await?
        .ok_or_else(|| RefreshJobError::not_found_by("id", job_id).into())
}

pub(crate) async fn get_by_feed_id(
    conn: &mut PgConnection,
    feed_id: FeedId,
) -> Result<FeedRefreshJob> {
    fetch_by_feed_id(conn, feed_id)
        .await?
        .ok_or_else(|| RefreshJobError::not_found_by("feed_id", feed_id).into())
}

/// Read the feed's job, inserting it when absent
///
/// Must run inside a transaction: the insert is wrapped in a savepoint so a
/// constraint violation leaves the outer transaction usable.
pub(crate) async fn get_or_create(
    conn: &mut PgConnection,
    new_job: &NewFeedRefreshJob,
    now: DateTime<Utc>,
) -> Result<FeedRefreshJob> {
    if let Some(job) = fetch_by_feed_id(conn, new_job.feed_id).await? {
        return Ok(job);
    }

    match try_insert(conn, new_job, now).await? {
        CreateOutcome::Created(job) => Ok(job),
        CreateOutcome::AlreadyExists => {
            debug!(feed_id = %new_job.feed_id, "Lost insert race, reading existing job");
            fetch_by_feed_id(conn, new_job.feed_id)
                .await?
                .ok_or_else(|| {
                    AppError::Database(format!(
                        "Refresh job for feed {} conflicted on insert but is not visible",
                        new_job.feed_id
                    ))
                })
        }
    }
}

async fn try_insert(
    conn: &mut PgConnection,
    new_job: &NewFeedRefreshJob,
    now: DateTime<Utc>,
) -> Result<CreateOutcome> {
    // Nested begin issues SAVEPOINT
    let mut savepoint = conn.begin().await.map_err(map_sqlx_error)?;

    let inserted = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        INSERT INTO feed_refresh_jobs (feed_id, state, execute_after, retries, state_changed_at)
        VALUES ($1, $2, $3, 0, $4)
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(new_job.feed_id)
    .bind(FeedRefreshJobState::Pending.as_str())
    .bind(new_job.execute_after)
    .bind(now)
    .fetch_one(&mut *savepoint)
    .await;

    match inserted {
        Ok(row) => {
            savepoint.commit().await.map_err(map_sqlx_error)?;
            Ok(CreateOutcome::Created(row.into_job()?))
        }
        Err(err) => {
            if let Err(rollback_err) = savepoint.rollback().await {
                // Connection is unusable; an existing row could not be re-read
                warn!(
                    feed_id = %new_job.feed_id,
                    error = %rollback_err,
                    "Savepoint rollback failed after insert error"
                );
                return Err(insert_error(err, new_job.feed_id));
            }
            match constraint_violation(&err) {
                Some(ConstraintViolation::DuplicateFeedJob) => Ok(CreateOutcome::AlreadyExists),
                _ => Err(insert_error(err, new_job.feed_id)),
            }
        }
    }
}

/// Insert failure as seen by the caller
fn insert_error(err: sqlx::Error, feed_id: FeedId) -> AppError {
    match constraint_violation(&err) {
        Some(ConstraintViolation::MissingFeed) => RefreshJobError::NoFeed { feed_id }.into(),
        _ => map_sqlx_error(err),
    }
}

pub(crate) async fn get_list(
    conn: &mut PgConnection,
    order_by: FeedRefreshJobOrdering,
    filter_by: Option<&FeedRefreshJobFiltering>,
    limit: i64,
    offset: i64,
) -> Result<Vec<FeedRefreshJob>> {
    let mut builder =
        QueryBuilder::<Postgres>::new(format!("SELECT {} FROM feed_refresh_jobs", JOB_COLUMNS));
    if let Some(filter) = filter_by {
        push_filters(&mut builder, filter);
    }
    builder.push(" ORDER BY ").push(order_clause(order_by));
    builder.push(" LIMIT ").push_bind(limit.max(0));
    builder.push(" OFFSET ").push_bind(offset.max(0));

    let rows = builder
        .build_query_as::<JobRow>()
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    rows.into_iter().map(JobRow::into_job).collect()
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &FeedRefreshJobFiltering) {
    let mut keyword = " WHERE ";
    if let Some(state) = filter.state {
        builder.push(keyword).push("state = ").push_bind(state.as_str());
        keyword = " AND ";
    }
    if let Some(before) = filter.state_changed_before {
        builder.push(keyword).push("state_changed_at < ").push_bind(before);
        keyword = " AND ";
    }
    if let Some(before) = filter.execute_before {
        builder.push(keyword).push("execute_after < ").push_bind(before);
    }
}

fn order_clause(order_by: FeedRefreshJobOrdering) -> &'static str {
    match order_by {
        FeedRefreshJobOrdering::IdAsc => "id ASC",
        FeedRefreshJobOrdering::ExecuteAfterAsc => "execute_after ASC, id ASC",
        FeedRefreshJobOrdering::StateChangedAtAsc => "state_changed_at ASC, id ASC",
    }
}

/// Partial update; never touches `state` or `state_changed_at`
pub(crate) async fn update(
    conn: &mut PgConnection,
    job_id: JobId,
    updates: &FeedRefreshJobUpdates,
) -> Result<FeedRefreshJob> {
    let not_found = || -> AppError {
        RefreshJobError::NotFound(format!(
            "Failed to update refresh job with job_id={}",
            job_id
        ))
        .into()
    };

    if updates.is_empty() {
        return fetch_by_id(conn, job_id).await?.ok_or_else(not_found);
    }

    let mut builder = QueryBuilder::<Postgres>::new("UPDATE feed_refresh_jobs SET ");
    let mut assignments = builder.separated(", ");
    if let Some(execute_after) = updates.execute_after {
        assignments
            .push("execute_after = ")
            .push_bind_unseparated(execute_after);
    }
    if let Some(retries) = updates.retries {
        assignments.push("retries = ").push_bind_unseparated(retries);
    }
    builder.push(" WHERE id = ").push_bind(job_id);
    builder.push(" RETURNING ").push(JOB_COLUMNS);

    let row = builder
        .build_query_as::<JobRow>()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    row.ok_or_else(not_found)?.into_job()
}

/// Compare-and-swap on one row, waiting for its lock
pub(crate) async fn transit_state(
    conn: &mut PgConnection,
    job_id: JobId,
    old_state: FeedRefreshJobState,
    new_state: FeedRefreshJobState,
    now: DateTime<Utc>,
) -> Result<FeedRefreshJob> {
    // Blocks until concurrent writers on this row finish
    sqlx::query("SELECT id FROM feed_refresh_jobs WHERE id = $1 FOR UPDATE")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE feed_refresh_jobs
        SET state = $3, state_changed_at = $4
        WHERE id = $1 AND state = $2
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(job_id)
    .bind(old_state.as_str())
    .bind(new_state.as_str())
    .bind(now)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    match row {
        Some(row) => row.into_job(),
        None => Err(RefreshJobError::StateTransition {
            job_id,
            from: old_state,
            to: new_state,
        }
        .into()),
    }
}

/// Compare-and-swap on every row of `job_ids` that is not locked right now
///
/// Returns the transitioned rows ordered by id.
pub(crate) async fn transit_state_batch(
    conn: &mut PgConnection,
    job_ids: &[JobId],
    old_state: FeedRefreshJobState,
    new_state: FeedRefreshJobState,
    now: DateTime<Utc>,
) -> Result<Vec<FeedRefreshJob>> {
    if job_ids.is_empty() {
        return Ok(Vec::new());
    }

    let locked: Vec<JobId> = sqlx::query_scalar(
        r#"
        SELECT id FROM feed_refresh_jobs
        WHERE id = ANY($1)
        ORDER BY id
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(job_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if locked.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE feed_refresh_jobs
        SET state = $3, state_changed_at = $4
        WHERE id = ANY($1) AND state = $2
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(&locked)
    .bind(old_state.as_str())
    .bind(new_state.as_str())
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let mut jobs = rows
        .into_iter()
        .map(JobRow::into_job)
        .collect::<Result<Vec<_>>>()?;
    jobs.sort_by_key(|job| job.id);

    debug!(
        requested = %job_ids.len(),
        locked = %locked.len(),
        transitioned = %jobs.len(),
        from = %old_state,
        to = %new_state,
        "Batch state transition"
    );
    Ok(jobs)
}

/// PostgreSQL row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    feed_id: i64,
    state: String,
    execute_after: DateTime<Utc>,
    retries: i32,
    state_changed_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<FeedRefreshJob> {
        let state = self.state.parse::<FeedRefreshJobState>().map_err(|_| {
            AppError::Database(format!(
                "Unknown state '{}' stored for refresh job {}",
                self.state, self.id
            ))
        })?;

        Ok(FeedRefreshJob {
            id: self.id,
            feed_id: self.feed_id,
            state,
            execute_after: self.execute_after,
            retries: self.retries,
            state_changed_at: self.state_changed_at,
        })
    }
}
