//! Background maintenance on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::memory::MemoryStore;

use super::passes::MaintenanceReport;

/// Handle to a running maintenance loop.
///
/// The first cycle runs one interval after spawning. Ticks missed while a
/// cycle is still running are skipped rather than queued, so cycles never
/// overlap.
pub struct MaintenanceScheduler {
    cancel: CancellationToken,
    reports: watch::Receiver<Option<MaintenanceReport>>,
    handle: JoinHandle<()>,
}

impl MaintenanceScheduler {
    /// Spawn a loop using the store's configured interval.
    pub fn spawn(store: Arc<MemoryStore>) -> Self {
        let period = store.config().maintenance_interval;
        Self::spawn_with_interval(store, period)
    }

    /// Spawn a loop with an explicit interval.
    pub fn spawn_with_interval(store: Arc<MemoryStore>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let (tx, reports) = watch::channel(None);
        let handle = tokio::spawn(run_loop(store, period, cancel.clone(), tx));
        info!(interval_secs = period.as_secs(), "maintenance scheduler started");
        Self {
            cancel,
            reports,
            handle,
        }
    }

    /// Token that stops the loop, including a cycle in progress.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver for the report of the most recent cycle.
    pub fn subscribe(&self) -> watch::Receiver<Option<MaintenanceReport>> {
        self.reports.clone()
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "maintenance task ended abnormally");
        }
        info!("maintenance scheduler stopped");
    }
}

async fn run_loop(
    store: Arc<MemoryStore>,
    period: Duration,
    cancel: CancellationToken,
    reports: watch::Sender<Option<MaintenanceReport>>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cycle_store = store.clone();
        let cycle_cancel = cancel.clone();
        let result =
            tokio::task::spawn_blocking(move || cycle_store.run_maintenance(&cycle_cancel)).await;

        match result {
            Ok(report) => {
                debug!(?report, "maintenance tick complete");
                reports.send_replace(Some(report));
            }
            Err(e) => warn!(error = %e, "maintenance cycle panicked"),
        }
    }
}
