//! Minimal periodic-task runner, rebuilt from the teacher's
//! `baseline_refresh_task.rs` usage of its own `ScheduledExecutor`: a
//! named timer that calls `ScheduledTask::run` every `interval` until
//! `should_terminate()` flips.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub trait ScheduledTask: Send + Sync {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;
    fn should_terminate(&self) -> bool;
}

pub struct ScheduledExecutor {
    name: String,
    interval: Duration,
}

impl ScheduledExecutor {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self { name: name.into(), interval }
    }

    /// Runs `task` on the configured interval until it asks to stop.
    /// Failures are logged, not propagated — one bad tick must not kill
    /// the loop.
    pub async fn start<T: ScheduledTask>(&self, task: T) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            if task.should_terminate() {
                tracing::info!(task = %self.name, "scheduled task terminating");
                return;
            }
            if let Err(e) = task.run().await {
                tracing::error!(task = %self.name, error = %e, "scheduled task run failed");
            }
            ticker.tick().await;
        }
    }
}
