//! Job repository contract against PostgreSQL
//!
//! Run with FEEDREFRESH_TEST_DATABASE_URL=postgres://... cargo test -p feedrefresh-integration-tests

mod common;

use chrono::Duration;
use common::job_ids;
use feedrefresh_core::domain::{
    FeedRefreshJobFiltering, FeedRefreshJobOrdering, FeedRefreshJobState, FeedRefreshJobUpdates,
    NewFeedRefreshJob, RefreshJobError,
};
use feedrefresh_core::error::AppError;
use feedrefresh_core::port::{
    atomic, FeedRefreshJobRepository, TimeProvider, TransactionalFeedRefreshJobRepository,
};
use std::sync::Arc;

use FeedRefreshJobState::{Completed, Failed, InProgress, Pending};

#[tokio::test]
async fn test_get_or_create_returns_existing_job() {
    let db = require_db!();
    let feed = db.add_feed("alpha").await;
    let now = db.clock.now();

    let created = db
        .jobs
        .get_or_create(&NewFeedRefreshJob::new(feed.id, now))
        .await
        .unwrap();
    let again = db
        .jobs
        .get_or_create(&NewFeedRefreshJob::new(feed.id, now + Duration::hours(1)))
        .await
        .unwrap();

    assert_eq!(created.state, Pending);
    assert_eq!(created.retries, 0);
    assert_eq!(created.state_changed_at, now);
    assert_eq!(again, created);
    assert_eq!(db.job_count().await, 1);

    db.teardown().await;
}

#[tokio::test]
async fn test_get_or_create_for_missing_feed() {
    let db = require_db!();

    let err = db
        .jobs
        .get_or_create(&NewFeedRefreshJob::new(424242, db.clock.now()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::RefreshJob(RefreshJobError::NoFeed { feed_id: 424242 })
    ));
    assert_eq!(db.job_count().await, 0);

    db.teardown().await;
}

#[tokio::test]
async fn test_concurrent_get_or_create_converges() {
    let db = require_db!();
    let feed_id = db.add_feed("race").await.id;
    let repo = Arc::new(db.jobs.clone());
    let now = db.clock.now();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.get_or_create(&NewFeedRefreshJob::new(feed_id, now)).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(db.job_count().await, 1);

    db.teardown().await;
}

#[tokio::test]
async fn test_get_or_create_conflict_keeps_transaction_usable() {
    let db = require_db!();
    let feed_id = db.add_feed("savepoint").await.id;
    let now = db.clock.now();

    // First transaction inserts but has not committed yet
    let mut first = db.jobs.begin_transaction().await.unwrap();
    let inserted = first
        .get_or_create(&NewFeedRefreshJob::new(feed_id, now))
        .await
        .unwrap();

    // Second transaction blocks on the unique key until the first commits
    let repo = db.jobs.clone();
    let second = tokio::spawn(async move {
        let mut tx = repo.begin_transaction().await.unwrap();
        let job = tx
            .get_or_create(&NewFeedRefreshJob::new(feed_id, now))
            .await
            .unwrap();
        // Still usable after the swallowed conflict
        let job = tx
            .update(job.id, &FeedRefreshJobUpdates::default().retries(7))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        job
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    first.commit().await.unwrap();

    let job = second.await.unwrap();
    assert_eq!(job.id, inserted.id);
    assert_eq!(db.jobs.get_by_id(job.id).await.unwrap().retries, 7);

    db.teardown().await;
}

#[tokio::test]
async fn test_lookups_report_not_found() {
    let db = require_db!();

    let by_id = db.jobs.get_by_id(99).await.unwrap_err();
    let by_feed = db.jobs.get_by_feed_id(99).await.unwrap_err();

    assert!(by_id.is_job_not_found());
    assert!(by_feed.is_job_not_found());
    assert!(by_feed.to_string().contains("feed_id 99"));

    db.teardown().await;
}

#[tokio::test]
async fn test_get_list_filters_orders_and_pages() {
    let db = require_db!();
    let now = db.clock.now();

    let mut jobs = Vec::new();
    for (name, offset_min) in [("a", 30), ("b", -10), ("c", -20), ("d", -5)] {
        let feed = db.add_feed(name).await;
        let job = db
            .jobs
            .get_or_create(&NewFeedRefreshJob::new(
                feed.id,
                now + Duration::minutes(offset_min),
            ))
            .await
            .unwrap();
        jobs.push(job);
    }
    db.force_state(jobs[3].id, Completed, now).await;

    let due = FeedRefreshJobFiltering::default()
        .state(Pending)
        .execute_before(now);
    let listed = db
        .jobs
        .get_list(FeedRefreshJobOrdering::ExecuteAfterAsc, Some(&due), 10, 0)
        .await
        .unwrap();
    assert_eq!(job_ids(&listed), vec![jobs[2].id, jobs[1].id]);

    let page = db
        .jobs
        .get_list(FeedRefreshJobOrdering::IdAsc, None, 2, 1)
        .await
        .unwrap();
    assert_eq!(job_ids(&page), vec![jobs[1].id, jobs[2].id]);

    let none = db
        .jobs
        .get_list(FeedRefreshJobOrdering::IdAsc, None, 10, 10)
        .await
        .unwrap();
    assert!(none.is_empty());

    db.teardown().await;
}

#[tokio::test]
async fn test_update_touches_only_given_fields() {
    let db = require_db!();
    let feed = db.add_feed("update").await;
    let job = db
        .jobs
        .get_or_create(&NewFeedRefreshJob::new(feed.id, db.clock.now()))
        .await
        .unwrap();
    db.clock.advance(Duration::minutes(3));

    let next = db.clock.now() + Duration::hours(2);
    let updated = db
        .jobs
        .update(job.id, &FeedRefreshJobUpdates::default().execute_after(next))
        .await
        .unwrap();

    assert_eq!(updated.execute_after, next);
    assert_eq!(updated.retries, job.retries);
    assert_eq!(updated.state, job.state);
    assert_eq!(updated.state_changed_at, job.state_changed_at);

    let unchanged = db
        .jobs
        .update(job.id, &FeedRefreshJobUpdates::default())
        .await
        .unwrap();
    assert_eq!(unchanged, updated);

    let missing = db
        .jobs
        .update(job.id + 1000, &FeedRefreshJobUpdates::default().retries(1))
        .await
        .unwrap_err();
    assert!(missing.is_job_not_found());

    db.teardown().await;
}

#[tokio::test]
async fn test_transit_state_is_compare_and_swap() {
    let db = require_db!();
    let feed = db.add_feed("cas").await;
    let job = db
        .jobs
        .get_or_create(&NewFeedRefreshJob::new(feed.id, db.clock.now()))
        .await
        .unwrap();
    db.clock.advance(Duration::seconds(42));

    let moved = db.jobs.transit_state(job.id, Pending, InProgress).await.unwrap();
    assert_eq!(moved.state, InProgress);
    assert_eq!(moved.state_changed_at, db.clock.now());
    assert_eq!(moved.execute_after, job.execute_after);

    let stale = db
        .jobs
        .transit_state(job.id, Pending, InProgress)
        .await
        .unwrap_err();
    assert!(matches!(
        stale,
        AppError::RefreshJob(RefreshJobError::StateTransition {
            from: Pending,
            to: InProgress,
            ..
        })
    ));

    let missing = db
        .jobs
        .transit_state(job.id + 1000, Pending, InProgress)
        .await
        .unwrap_err();
    assert!(missing.is_state_transition());

    db.teardown().await;
}

#[tokio::test]
async fn test_transit_state_waits_for_row_lock() {
    let db = require_db!();
    let feed = db.add_feed("blocking").await;
    let job = db
        .jobs
        .get_or_create(&NewFeedRefreshJob::new(feed.id, db.clock.now()))
        .await
        .unwrap();

    let mut holder = db.jobs.begin_transaction().await.unwrap();
    holder.transit_state(job.id, Pending, InProgress).await.unwrap();

    let repo = db.jobs.clone();
    let job_id = job.id;
    let waiter = tokio::spawn(async move { repo.transit_state(job_id, Pending, InProgress).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());
    holder.commit().await.unwrap();

    // Re-evaluated against the committed state
    assert!(waiter.await.unwrap().unwrap_err().is_state_transition());

    db.teardown().await;
}

#[tokio::test]
async fn test_batch_transition_skips_locked_and_mismatched_rows() {
    let db = require_db!();
    let mut jobs = Vec::new();
    for name in ["one", "two", "three", "four"] {
        let feed = db.add_feed(name).await;
        jobs.push(
            db.jobs
                .get_or_create(&NewFeedRefreshJob::new(feed.id, db.clock.now()))
                .await
                .unwrap(),
        );
    }
    db.force_state(jobs[3].id, Failed, db.clock.now()).await;

    // Another transaction holds the lock on the first job
    let mut holder = db.jobs.begin_transaction().await.unwrap();
    holder
        .update(jobs[0].id, &FeedRefreshJobUpdates::default().retries(1))
        .await
        .unwrap();

    let requested = vec![jobs[2].id, jobs[0].id, jobs[1].id, jobs[3].id, 999_999];
    let claimed = db
        .jobs
        .transit_state_batch(&requested, Pending, InProgress)
        .await
        .unwrap();
    holder.rollback().await.unwrap();

    assert_eq!(job_ids(&claimed), vec![jobs[1].id, jobs[2].id]);
    assert!(claimed.iter().all(|job| job.state == InProgress));
    assert_eq!(db.jobs.get_by_id(jobs[0].id).await.unwrap().state, Pending);
    assert_eq!(db.jobs.get_by_id(jobs[3].id).await.unwrap().state, Failed);

    let empty = db
        .jobs
        .transit_state_batch(&[], Pending, InProgress)
        .await
        .unwrap();
    assert!(empty.is_empty());

    db.teardown().await;
}

#[tokio::test]
async fn test_atomic_rolls_back_on_error() {
    let db = require_db!();
    let feed = db.add_feed("atomic").await;
    let job = db
        .jobs
        .get_or_create(&NewFeedRefreshJob::new(feed.id, db.clock.now()))
        .await
        .unwrap();
    let job_id = job.id;

    let result: Result<(), AppError> = atomic(&db.jobs, move |tx| {
        Box::pin(async move {
            tx.transit_state(job_id, Pending, InProgress).await?;
            tx.update(job_id, &FeedRefreshJobUpdates::default().retries(5))
                .await?;
            Err(AppError::Internal("abort".to_string()))
        })
    })
    .await;

    assert!(result.is_err());
    assert_eq!(db.jobs.get_by_id(job_id).await.unwrap(), job);

    let committed = atomic(&db.jobs, move |tx| {
        Box::pin(async move { tx.transit_state(job_id, Pending, InProgress).await })
    })
    .await
    .unwrap();
    assert_eq!(db.jobs.get_by_id(job_id).await.unwrap(), committed);

    db.teardown().await;
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back_insert() {
    let db = require_db!();
    let feed = db.add_feed("dropped").await;

    {
        let mut tx = db.jobs.begin_transaction().await.unwrap();
        tx.get_or_create(&NewFeedRefreshJob::new(feed.id, db.clock.now()))
            .await
            .unwrap();
    }

    assert!(db
        .jobs
        .get_by_feed_id(feed.id)
        .await
        .unwrap_err()
        .is_job_not_found());

    db.teardown().await;
}

#[tokio::test]
async fn test_deleting_feed_removes_its_job() {
    let db = require_db!();
    let feed = db.add_feed("cascade").await;
    db.jobs
        .get_or_create(&NewFeedRefreshJob::new(feed.id, db.clock.now()))
        .await
        .unwrap();

    sqlx::query("DELETE FROM feeds WHERE id = $1")
        .bind(feed.id)
        .execute(&db.pool)
        .await
        .unwrap();

    assert_eq!(db.job_count().await, 0);

    db.teardown().await;
}
