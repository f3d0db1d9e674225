use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::orchestrator::FetchOrchestrator;

/// Periodic full refresh of the camera list.
///
/// The first tick fires immediately. A refresh is awaited inside the loop, so
/// two rounds from this timer never overlap; ticks missed while a slow round
/// runs are skipped, not replayed.
pub struct PeriodicLister {
    orchestrator: Arc<FetchOrchestrator>,
    period: Duration,
}

impl PeriodicLister {
    pub fn new(orchestrator: Arc<FetchOrchestrator>, period: Duration) -> Self {
        Self { orchestrator, period }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("[scheduler] camera list updater started (every {:?})", self.period);
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.orchestrator.refresh_all().await;
                    }
                }
            }
            info!("[scheduler] camera list updater stopped");
        })
    }
}
