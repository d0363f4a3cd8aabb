/// Janitor task implementations
use crate::{
    context::AppContext,
    drop_store::DropId,
    error::{DropError, DropResult},
    metrics::{self, DeleteReason},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::SystemTime;
use tokio::time::timeout;

/// Outcome of one expiry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    pub removed: u64,
    /// Of `removed`, drops reclaimed for running out of downloads
    pub exhausted: u64,
    /// Already deleted by a racing request or an earlier pass
    pub already_gone: u64,
    pub failures: u64,
}

/// Outcome of one orphan reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanSweep {
    pub orphans_removed: u64,
    pub staging_removed: u64,
    pub failures: u64,
}

/// Reclaim every drop due at `now`.
///
/// Each id goes through the same delete path an explicit delete uses. A
/// failure on one id is logged and counted; the pass moves on and the id is
/// picked up again next interval.
pub async fn sweep_expired(ctx: &AppContext, now: DateTime<Utc>) -> ExpirySweep {
    let mut report = ExpirySweep::default();
    let per_item_timeout = ctx.config.service.operation_timeout;
    let mut expired = ctx.drops.store().list_expired(now);

    while let Some(item) = expired.next().await {
        let expired_drop = match item {
            Ok(expired_drop) => expired_drop,
            Err(e) => {
                tracing::warn!("Expired drop listing failed, resuming next sweep: {}", e);
                metrics::record_janitor_item_failure("sweep_expired");
                report.failures += 1;
                break;
            }
        };

        let id = &expired_drop.id;
        let reason = if expired_drop.exhausted {
            DeleteReason::Exhausted
        } else {
            DeleteReason::Expired
        };

        match timeout(per_item_timeout, ctx.drops.delete(id, reason)).await {
            Ok(Ok(())) => {
                tracing::debug!("Swept {} drop {}", reason.as_str(), id);
                report.removed += 1;
                if expired_drop.exhausted {
                    report.exhausted += 1;
                }
            }
            Ok(Err(DropError::NotFound)) => report.already_gone += 1,
            Ok(Err(e)) => {
                tracing::warn!("Failed to sweep drop {}: {}", id, e);
                metrics::record_janitor_item_failure("sweep_expired");
                report.failures += 1;
            }
            Err(_) => {
                tracing::warn!("Timed out sweeping drop {}", id);
                metrics::record_janitor_item_failure("sweep_expired");
                report.failures += 1;
            }
        }
    }

    report
}

/// Remove blobs that no metadata row references.
///
/// Only blobs older than `cutoff` are considered, which keeps this pass
/// away from uploads whose row has not been written yet.
pub async fn reconcile_orphans(ctx: &AppContext, cutoff: SystemTime) -> DropResult<OrphanSweep> {
    let mut report = OrphanSweep::default();
    let blobs = ctx.drops.blobs();

    for id in blobs.list_older_than(cutoff).await? {
        match remove_if_orphaned(ctx, &id).await {
            Ok(true) => {
                tracing::info!("Removed orphaned blob {}", id);
                metrics::record_orphan_removed();
                report.orphans_removed += 1;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Failed to reconcile blob {}: {}", id, e);
                metrics::record_janitor_item_failure("reconcile_orphans");
                report.failures += 1;
            }
        }
    }

    report.staging_removed = blobs.purge_staging(cutoff).await?;

    Ok(report)
}

async fn remove_if_orphaned(ctx: &AppContext, id: &DropId) -> DropResult<bool> {
    if ctx.drops.store().contains(id).await? {
        return Ok(false);
    }

    match ctx.drops.blobs().delete(id).await {
        Ok(()) => Ok(true),
        Err(DropError::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Refresh the stored-drops gauges
pub async fn refresh_usage(ctx: &AppContext) -> DropResult<()> {
    let usage = ctx.drops.store().usage().await?;
    metrics::set_storage_usage(usage.drops, usage.bytes);
    Ok(())
}
