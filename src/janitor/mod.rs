use crate::{context::AppContext, metrics};
use chrono::Utc;
use std::time::{Instant, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

pub mod tasks;

pub use tasks::{ExpirySweep, OrphanSweep};

/// Combined result of one janitor pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expiry: ExpirySweep,
    pub orphans: OrphanSweep,
}

/// Background reclamation of expired drops.
///
/// Talks to storage only through the same operations request handlers use
/// and never holds a lock across a batch.
pub struct Janitor {
    context: AppContext,
}

/// Running janitor. Dropping the handle also stops the loop.
pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stop after the current pass and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Janitor task ended abnormally: {}", e);
        }
    }
}

impl Janitor {
    pub fn new(context: AppContext) -> Self {
        Self { context }
    }

    /// Spawn the sweep loop on a fixed interval
    pub fn start(self) -> JanitorHandle {
        let (shutdown, rx) = watch::channel(false);
        info!(
            "Starting janitor (interval {:?}, orphan grace {:?})",
            self.context.config.janitor.sweep_interval, self.context.config.janitor.orphan_grace
        );
        let task = tokio::spawn(self.run(rx));
        JanitorHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.context.config.janitor.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            self.sweep_once().await;
        }

        info!("Janitor stopped");
    }

    /// Run one complete pass: expiry sweep, orphan reconciliation, usage refresh
    pub async fn sweep_once(&self) -> SweepReport {
        let ctx = &self.context;

        let started = Instant::now();
        let expiry = tasks::sweep_expired(ctx, Utc::now()).await;
        metrics::record_janitor_run(
            "sweep_expired",
            expiry.failures == 0,
            started.elapsed().as_secs_f64(),
        );

        if expiry.removed > 0 || expiry.failures > 0 {
            info!(
                "Expiry sweep: removed {} ({} exhausted), already gone {}, failed {}",
                expiry.removed, expiry.exhausted, expiry.already_gone, expiry.failures
            );
        } else {
            debug!("Expiry sweep: nothing to do");
        }

        let started = Instant::now();
        let cutoff = SystemTime::now()
            .checked_sub(ctx.config.janitor.orphan_grace)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let orphans = match tasks::reconcile_orphans(ctx, cutoff).await {
            Ok(orphans) => {
                metrics::record_janitor_run(
                    "reconcile_orphans",
                    orphans.failures == 0,
                    started.elapsed().as_secs_f64(),
                );
                if orphans.orphans_removed > 0 || orphans.staging_removed > 0 {
                    info!(
                        "Orphan reconciliation: removed {} blobs, {} staging files",
                        orphans.orphans_removed, orphans.staging_removed
                    );
                }
                orphans
            }
            Err(e) => {
                metrics::record_janitor_run(
                    "reconcile_orphans",
                    false,
                    started.elapsed().as_secs_f64(),
                );
                error!("Orphan reconciliation failed: {}", e);
                OrphanSweep {
                    failures: 1,
                    ..OrphanSweep::default()
                }
            }
        };

        if let Err(e) = tasks::refresh_usage(ctx).await {
            error!("Failed to refresh storage usage: {}", e);
        }

        SweepReport { expiry, orphans }
    }
}
