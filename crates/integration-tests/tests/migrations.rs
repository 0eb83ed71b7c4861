//! Schema migrations against PostgreSQL

mod common;

use feedrefresh_infra_postgres::{run_migrations, MIGRATOR};

#[tokio::test]
async fn test_concurrent_startups_migrate_once() {
    let Some(db) = common::TestDb::create_unmigrated().await else {
        return;
    };

    // Daemons booting against the same empty schema
    let (first, second, third) = tokio::join!(
        run_migrations(&db.pool),
        run_migrations(&db.pool),
        run_migrations(&db.pool)
    );
    assert!(first.is_ok(), "{:?}", first);
    assert!(second.is_ok(), "{:?}", second);
    assert!(third.is_ok(), "{:?}", third);

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(applied, MIGRATOR.iter().count() as i64);
    assert_eq!(db.job_count().await, 0);

    db.teardown().await;
}

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    let db = require_db!();
    let feed = db.add_feed("kept").await;

    run_migrations(&db.pool).await.unwrap();

    assert_eq!(db.post_count(feed.id).await, 0);
    let url: String = sqlx::query_scalar("SELECT url FROM feeds WHERE id = $1")
        .bind(feed.id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(url, feed.url);

    db.teardown().await;
}
