use crate::core::error::AppError;
use crate::core::flow::scheduler::FlowEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Periodically wakes suspended runs whose timer or deadline has passed.
///
/// Waking is idempotent: two triggers racing on the same run both load it,
/// and the compare-and-swap save lets exactly one of them resume it.
pub struct ResumeTrigger {
    engine: Arc<FlowEngine>,
}

impl ResumeTrigger {
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self { engine }
    }

    /// One scan of due waits.
    pub async fn tick(&self) -> Result<Vec<Uuid>, AppError> {
        let woken = self.engine.wake_due().await?;
        if !woken.is_empty() {
            tracing::info!(count = woken.len(), "woke suspended runs");
        }
        Ok(woken)
    }

    /// Poll until `shutdown` flips to true. Scan errors are logged and polling continues.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = poll_interval.as_millis() as u64, "resume trigger started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "wake scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("resume trigger stopped");
    }
}
