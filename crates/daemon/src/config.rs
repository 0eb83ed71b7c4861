// Daemon configuration (environment variables, read once at start)

use anyhow::{ensure, Context, Result};
use feedrefresh_core::application::worker::constants::*;
use feedrefresh_core::application::RefreshSettings;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SCHEDULER_TICK_SECS: u64 = 30;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Refresh worker loops in this process
    pub workers: usize,
    pub fetch_timeout: Duration,
    /// Idle sleep of the scheduler and recovery loops
    pub scheduler_tick: Duration,
    pub refresh: RefreshSettings,
}

impl Settings {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let refresh = RefreshSettings {
            initial_delay: seconds(&lookup, "FEEDREFRESH_INITIAL_DELAY_SECS", DEFAULT_INITIAL_DELAY_SECS)?,
            refresh_interval: seconds(&lookup, "FEEDREFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS)?,
            retry_base_delay: seconds(&lookup, "FEEDREFRESH_RETRY_BASE_SECS", DEFAULT_RETRY_BASE_DELAY_SECS)?,
            retry_max_delay: seconds(&lookup, "FEEDREFRESH_RETRY_MAX_SECS", DEFAULT_RETRY_MAX_DELAY_SECS)?,
            stale_after: seconds(&lookup, "FEEDREFRESH_STALE_AFTER_SECS", DEFAULT_STALE_AFTER_SECS)?,
            batch_size: parse_or(&lookup, "FEEDREFRESH_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            concurrency: parse_or(&lookup, "FEEDREFRESH_CONCURRENCY", DEFAULT_CONCURRENCY)?,
        };

        let settings = Self {
            database_url,
            db_max_connections: parse_or(
                &lookup,
                "FEEDREFRESH_DB_MAX_CONNECTIONS",
                DEFAULT_DB_MAX_CONNECTIONS,
            )?,
            workers: parse_or(&lookup, "FEEDREFRESH_WORKERS", DEFAULT_WORKERS)?,
            fetch_timeout: Duration::from_secs(parse_or(
                &lookup,
                "FEEDREFRESH_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
            scheduler_tick: Duration::from_secs(parse_or(
                &lookup,
                "FEEDREFRESH_SCHEDULER_TICK_SECS",
                DEFAULT_SCHEDULER_TICK_SECS,
            )?),
            refresh,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.db_max_connections > 0, "FEEDREFRESH_DB_MAX_CONNECTIONS must be at least 1");
        ensure!(self.workers > 0, "FEEDREFRESH_WORKERS must be at least 1");
        ensure!(self.refresh.batch_size > 0, "FEEDREFRESH_BATCH_SIZE must be at least 1");
        ensure!(self.refresh.concurrency > 0, "FEEDREFRESH_CONCURRENCY must be at least 1");
        ensure!(
            self.refresh.retry_base_delay <= self.refresh.retry_max_delay,
            "FEEDREFRESH_RETRY_BASE_SECS must not exceed FEEDREFRESH_RETRY_MAX_SECS"
        );
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number (got {:?})", key, raw)),
        None => Ok(default),
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: i64,
) -> Result<chrono::Duration> {
    let secs: i64 = parse_or(lookup, key, default)?;
    ensure!(secs >= 0, "{} must not be negative", key);
    ensure!(
        secs <= MAX_DELAY_SECS,
        "{} must be at most {} seconds (got {})",
        key,
        MAX_DELAY_SECS,
        secs
    );
    chrono::Duration::try_seconds(secs).with_context(|| format!("{} is out of range", key))
}
