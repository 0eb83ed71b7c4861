//! Shared Postgres fixture
//!
//! Every test gets a fresh schema (search_path pinned on each pooled
//! connection) so tests can run in parallel against one database.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use feedrefresh_core::domain::{Feed, FeedRefreshJob, FeedRefreshJobState, JobId};
use feedrefresh_core::port::mocks::ManualTimeProvider;
use feedrefresh_infra_postgres::{
    create_pool_with, run_migrations, PostgresFeedRefreshJobRepository, PostgresFeedRepository,
};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection, PgPool};
use std::str::FromStr;
use std::sync::Arc;

pub const TEST_DATABASE_URL_ENV: &str = "FEEDREFRESH_TEST_DATABASE_URL";

/// Returns the fixture, or from the enclosing test when no database is configured
#[macro_export]
macro_rules! require_db {
    () => {
        match common::TestDb::create().await {
            Some(db) => db,
            None => return,
        }
    };
}

pub struct TestDb {
    pub pool: PgPool,
    pub clock: Arc<ManualTimeProvider>,
    pub jobs: PostgresFeedRefreshJobRepository,
    pub feeds: PostgresFeedRepository,
    url: String,
    schema: String,
}

impl TestDb {
    pub async fn create() -> Option<Self> {
        let db = Self::create_unmigrated().await?;
        run_migrations(&db.pool).await.unwrap();
        Some(db)
    }

    /// Fresh empty schema, no tables yet
    pub async fn create_unmigrated() -> Option<Self> {
        let url = match std::env::var(TEST_DATABASE_URL_ENV) {
            Ok(url) => url,
            Err(_) => {
                eprintln!("skipping: {} is not set", TEST_DATABASE_URL_ENV);
                return None;
            }
        };

        let schema = format!("feedrefresh_test_{}", uuid::Uuid::new_v4().simple());
        let mut admin = PgConnection::connect(&url).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&mut admin)
            .await
            .unwrap();
        admin.close().await.unwrap();

        let options = PgConnectOptions::from_str(&url)
            .unwrap()
            .options([("search_path", schema.as_str())]);
        let pool = create_pool_with(options, 16).await.unwrap();

        let clock = Arc::new(ManualTimeProvider::new(start_time()));
        let jobs = PostgresFeedRefreshJobRepository::new(pool.clone(), clock.clone());
        let feeds = PostgresFeedRepository::new(pool.clone());

        Some(Self {
            pool,
            clock,
            jobs,
            feeds,
            url,
            schema,
        })
    }

    pub async fn add_feed(&self, name: &str) -> Feed {
        self.feeds
            .add_feed(&format!("https://{}.example.com/feed.xml", name), Some(name))
            .await
            .unwrap()
    }

    /// Force a job into a state, bypassing the transition protocol
    pub async fn force_state(&self, job_id: JobId, state: FeedRefreshJobState, changed_at: DateTime<Utc>) {
        sqlx::query("UPDATE feed_refresh_jobs SET state = $2, state_changed_at = $3 WHERE id = $1")
            .bind(job_id)
            .bind(state.as_str())
            .bind(changed_at)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn job_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM feed_refresh_jobs")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn post_count(&self, feed_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM feed_posts WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn teardown(self) {
        self.pool.close().await;
        let mut admin = PgConnection::connect(&self.url).await.unwrap();
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&mut admin)
            .await
            .unwrap();
        admin.close().await.unwrap();
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn job_ids(jobs: &[FeedRefreshJob]) -> Vec<JobId> {
    jobs.iter().map(|job| job.id).collect()
}
