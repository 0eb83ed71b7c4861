// PostgreSQL FeedRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use feedrefresh_core::domain::{Feed, FeedId};
use feedrefresh_core::error::{AppError, Result};
use feedrefresh_core::port::FeedRepository;
use sqlx::PgPool;

pub struct PostgresFeedRepository {
    pool: PgPool,
}

impl PostgresFeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a feed, returning the existing row when the URL is known
    pub async fn add_feed(&self, url: &str, title: Option<&str>) -> Result<Feed> {
        let row = sqlx::query_as::<_, FeedRow>(
            r#"
            INSERT INTO feeds (url, title) VALUES ($1, $2)
            ON CONFLICT (url) DO UPDATE SET url = EXCLUDED.url
            RETURNING id, url, title
            "#,
        )
        .bind(url)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }
}

#[async_trait]
impl FeedRepository for PostgresFeedRepository {
    async fn get_by_id(&self, feed_id: FeedId) -> Result<Feed> {
        let row = sqlx::query_as::<_, FeedRow>("SELECT id, url, title FROM feeds WHERE id = $1")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(Feed::from)
            .ok_or_else(|| AppError::NotFound(format!("Feed {} not found", feed_id)))
    }

    async fn list_unscheduled(&self, limit: i64) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.url, f.title
            FROM feeds f
            WHERE NOT EXISTS (SELECT 1 FROM feed_refresh_jobs j WHERE j.feed_id = f.id)
            ORDER BY f.id
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    url: String,
    title: Option<String>,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            url: row.url,
            title: row.title,
        }
    }
}
