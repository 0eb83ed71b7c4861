// Migration Runner

use feedrefresh_core::error::{AppError, Result};
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

/// Embedded `migrations/` directory, applied in version order
///
/// Applied versions are tracked in `_sqlx_migrations`. The runner holds a
/// Postgres advisory lock, so daemons starting together apply each file once.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;

    let latest = MIGRATOR.iter().map(|m| m.version).max().unwrap_or_default();
    info!(schema_version = %latest, "All migrations applied successfully");
    Ok(())
}
