// PostgreSQL Connection Pool Setup

use crate::error::map_sqlx_error;
use feedrefresh_core::error::Result;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a connection pool from a `postgres://` URL
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(database_url).map_err(map_sqlx_error)?;
    create_pool_with(options, max_connections).await
}

/// Create a connection pool from prepared options
pub async fn create_pool_with(options: PgConnectOptions, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}
