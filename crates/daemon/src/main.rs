//! Feedrefresh - Main Entry Point
//! Refresh workers + scheduler + stale job recovery over one Postgres pool

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import workspace crates
use config::Settings;
use feedrefresh_core::application::{
    shutdown_channel, BackgroundTask, RecoveryService, RefreshFeed, ScheduleFeedUpdate,
    ShutdownToken, UpdateFeedContent, Worker,
};
use feedrefresh_core::domain::FeedId;
use feedrefresh_core::port::time_provider::SystemTimeProvider;
use feedrefresh_core::port::TimeProvider;
use feedrefresh_infra_http::HttpFeedContentFetcher;
use feedrefresh_infra_postgres::{
    create_pool, run_migrations, PgPool, PostgresFeedPostRepository,
    PostgresFeedRefreshJobRepository, PostgresFeedRepository,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "feedrefresh")]
#[command(about = "Feed refresh job engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers, scheduler and recovery until Ctrl+C (default)
    Run,

    /// Register a feed and schedule its refresh job
    AddFeed {
        /// Feed URL
        url: String,

        /// Display title
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Make a feed's refresh job due now
    Refresh {
        /// Feed ID
        feed_id: FeedId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    init_logging()?;

    // 2. Load configuration
    let settings = Settings::from_env()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(settings).await,
        Commands::AddFeed { url, title } => add_feed(settings, &url, title.as_deref()).await,
        Commands::Refresh { feed_id } => refresh_feed(settings, feed_id).await,
    }
}

/// Pool with migrations applied
async fn open_database(settings: &Settings) -> Result<PgPool> {
    let pool = create_pool(&settings.database_url, settings.db_max_connections)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;
    Ok(pool)
}

async fn add_feed(settings: Settings, url: &str, title: Option<&str>) -> Result<()> {
    let pool = open_database(&settings).await?;
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo = Arc::new(PostgresFeedRefreshJobRepository::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let feed_repo = Arc::new(PostgresFeedRepository::new(pool.clone()));

    let feed = feed_repo
        .add_feed(url, title)
        .await
        .with_context(|| format!("Failed to add feed {}", url))?;
    let scheduler = ScheduleFeedUpdate::new(job_repo, feed_repo, time_provider, settings.refresh);
    let job = scheduler
        .schedule(feed.id)
        .await
        .context("Failed to schedule feed")?;

    println!(
        "feed {} ({}) job {} {} due {}",
        feed.id, feed.url, job.id, job.state, job.execute_after
    );
    pool.close().await;
    Ok(())
}

async fn refresh_feed(settings: Settings, feed_id: FeedId) -> Result<()> {
    let pool = open_database(&settings).await?;
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo = Arc::new(PostgresFeedRefreshJobRepository::new(
        pool.clone(),
        time_provider.clone(),
    ));

    let job = RefreshFeed::new(job_repo, time_provider)
        .refresh(feed_id)
        .await
        .with_context(|| format!("Failed to refresh feed {}", feed_id))?;

    println!("job {} {} due {}", job.id, job.state, job.execute_after);
    pool.close().await;
    Ok(())
}

async fn run_daemon(settings: Settings) -> Result<()> {
    info!("Feedrefresh v{} starting...", VERSION);
    info!(
        workers = %settings.workers,
        batch_size = %settings.refresh.batch_size,
        concurrency = %settings.refresh.concurrency,
        "Configuration loaded"
    );

    // 3. Initialize database
    let pool = open_database(&settings).await?;

    // 4. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo = Arc::new(PostgresFeedRefreshJobRepository::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let feed_repo = Arc::new(PostgresFeedRepository::new(pool.clone()));
    let post_repo = Arc::new(PostgresFeedPostRepository::new(pool.clone()));
    let fetcher = Arc::new(
        HttpFeedContentFetcher::new(settings.fetch_timeout)
            .context("HTTP fetcher creation failed")?,
    );

    // 5. Hand back jobs abandoned by a previous run
    info!("Running stale job recovery...");
    let recovery = Arc::new(RecoveryService::new(
        job_repo.clone(),
        time_provider.clone(),
        &settings.refresh,
    ));
    match recovery.recover_stale_jobs().await {
        Ok(count) => info!(recovered_jobs = count, "Stale job recovery completed"),
        Err(e) => error!(error = %e, "Stale job recovery failed"),
    }

    let scheduler = Arc::new(ScheduleFeedUpdate::new(
        job_repo.clone(),
        feed_repo.clone(),
        time_provider.clone(),
        settings.refresh.clone(),
    ));
    let updater = Arc::new(UpdateFeedContent::new(
        job_repo.clone(),
        job_repo.clone(),
        feed_repo,
        fetcher,
        post_repo,
        time_provider,
        settings.refresh.clone(),
    ));

    // 6. Start loops
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut handles = Vec::with_capacity(settings.workers + 2);

    info!(workers = %settings.workers, "Starting refresh workers...");
    for _ in 0..settings.workers {
        handles.push(spawn_loop(Worker::new(updater.clone()), shutdown_rx.clone()));
    }
    handles.push(spawn_loop(
        Worker::new(scheduler as Arc<dyn BackgroundTask>).with_idle_sleep(settings.scheduler_tick),
        shutdown_rx.clone(),
    ));
    handles.push(spawn_loop(
        Worker::new(recovery as Arc<dyn BackgroundTask>).with_idle_sleep(settings.scheduler_tick),
        shutdown_rx,
    ));

    info!("System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: in-flight refreshes finish, idle loops wake up
    shutdown_tx.shutdown();
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    })
    .await;
    if drained.is_err() {
        error!(
            timeout_secs = %SHUTDOWN_TIMEOUT.as_secs(),
            "Loops did not stop in time; in-progress jobs will be recovered on next start"
        );
    }
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}

/// JSON when FEEDREFRESH_LOG_FORMAT=json, pretty otherwise
fn init_logging() -> Result<()> {
    let log_format =
        std::env::var("FEEDREFRESH_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("feedrefresh=info"))
        .context("Failed to create env filter")?;

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
    Ok(())
}

fn spawn_loop(worker: Worker, shutdown: ShutdownToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = worker.run(shutdown).await {
            error!(error = %e, "Worker failed");
        }
    })
}
