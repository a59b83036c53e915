//! 归档调度器
//!
//! Sends an archive trigger once at startup and then every `period`.
//! Registered as `TaskKind::Periodic`.

use super::worker::ArchiveTrigger;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct ArchiveScheduler {
    trigger: ArchiveTrigger,
    period: Duration,
    shutdown: CancellationToken,
}

impl ArchiveScheduler {
    pub fn new(trigger: ArchiveTrigger, period: Duration, shutdown: CancellationToken) -> Self {
        Self {
            trigger,
            period,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(period_secs = self.period.as_secs(), "Archive scheduler started");

        // First tick completes immediately
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Archive scheduler received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if !self.trigger.trigger() {
                        tracing::debug!("Archive trigger not delivered");
                    }
                }
            }
        }
    }
}
