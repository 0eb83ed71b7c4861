// Application Layer - Use Cases and Business Logic

pub mod recovery;
pub mod refresh_feed;
pub mod retry;
pub mod schedule_feed_update;
pub mod settings;
pub mod update_feed_content;
pub mod worker;

// Re-exports
pub use recovery::RecoveryService;
pub use refresh_feed::RefreshFeed;
pub use retry::RetryPolicy;
pub use schedule_feed_update::ScheduleFeedUpdate;
pub use settings::RefreshSettings;
pub use update_feed_content::{RefreshSummary, UpdateFeedContent};
pub use worker::{shutdown_channel, BackgroundTask, ShutdownSender, ShutdownToken, Worker};
