// Worker - Background loop driving a periodic task

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// A unit of periodic work (refresh cycle, scheduler pass, recovery pass)
#[async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run one pass; returns how many jobs it handled
    async fn run_once(&self) -> Result<usize>;
}

/// Worker runs a task until shutdown
pub struct Worker {
    task: Arc<dyn BackgroundTask>,
    idle_sleep: Duration,
    error_sleep: Duration,
}

impl Worker {
    pub fn new(task: Arc<dyn BackgroundTask>) -> Self {
        Self {
            task,
            idle_sleep: IDLE_SLEEP_DURATION,
            error_sleep: ERROR_RECOVERY_SLEEP_DURATION,
        }
    }

    /// Override the sleep after a pass that handled nothing
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// A pass that handled jobs is followed immediately by the next one.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let name = self.task.name();
        info!(task = name, "Worker started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let pause = match self.task.run_once().await {
                Ok(0) => Some(self.idle_sleep),
                Ok(handled) => {
                    debug!(task = name, handled = handled, "Pass finished");
                    None
                }
                Err(e) => {
                    error!(task = name, error = %e, "Worker pass failed");
                    Some(self.error_sleep)
                }
            };

            if let Some(pause) = pause {
                if shutdown.sleep(pause).await {
                    info!(task = name, "Worker interrupted while sleeping");
                    break;
                }
            }
        }

        info!(task = name, "Worker stopped");
        Ok(())
    }
}
