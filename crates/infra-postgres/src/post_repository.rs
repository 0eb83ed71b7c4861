// PostgreSQL FeedPostRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use feedrefresh_core::domain::{FeedId, NewFeedPost};
use feedrefresh_core::error::Result;
use feedrefresh_core::port::FeedPostRepository;
use sqlx::PgPool;

pub struct PostgresFeedPostRepository {
    pool: PgPool,
}

impl PostgresFeedPostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedPostRepository for PostgresFeedPostRepository {
    async fn persist_new(&self, feed_id: FeedId, posts: &[NewFeedPost]) -> Result<u64> {
        if posts.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut inserted = 0;

        for post in posts {
            let result = sqlx::query(
                r#"
                INSERT INTO feed_posts (feed_id, guid, title, url, summary, published_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (feed_id, guid) DO NOTHING
                "#,
            )
            .bind(feed_id)
            .bind(&post.guid)
            .bind(&post.title)
            .bind(&post.url)
            .bind(&post.summary)
            .bind(post.published_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(inserted)
    }
}
