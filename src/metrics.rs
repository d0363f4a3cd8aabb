/// Metrics and telemetry for Dropkeep
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Drop lifecycle events (create, download, delete by reason)
/// - Janitor sweeps and per-id failures
/// - Stored drop count and bytes

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Drop Metrics ==========

    /// Drops successfully created
    pub static ref DROPS_CREATED_TOTAL: IntCounter = register_int_counter!(
        "drops_created_total",
        "Total number of drops created"
    )
    .expect("register drops_created_total");

    /// Bytes accepted by successful uploads
    pub static ref DROP_BYTES_UPLOADED_TOTAL: IntCounter = register_int_counter!(
        "drop_bytes_uploaded_total",
        "Total payload bytes accepted"
    )
    .expect("register drop_bytes_uploaded_total");

    /// Successful downloads
    pub static ref DROPS_DOWNLOADED_TOTAL: IntCounter = register_int_counter!(
        "drops_downloaded_total",
        "Total number of successful drop downloads"
    )
    .expect("register drops_downloaded_total");

    /// Deleted drops by reason: explicit, expired, exhausted
    pub static ref DROPS_DELETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "drops_deleted_total",
        "Total number of drops deleted",
        &["reason"]
    )
    .expect("register drops_deleted_total");

    /// Drops currently stored (refreshed by the janitor)
    pub static ref DROPS_STORED: IntGauge = register_int_gauge!(
        "drops_stored",
        "Number of drop rows currently stored"
    )
    .expect("register drops_stored");

    /// Bytes currently stored (refreshed by the janitor)
    pub static ref DROP_BYTES_STORED: IntGauge = register_int_gauge!(
        "drop_bytes_stored",
        "Payload bytes referenced by stored drops"
    )
    .expect("register drop_bytes_stored");

    // ========== Janitor Metrics ==========

    /// Janitor passes by task and status
    pub static ref JANITOR_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "janitor_runs_total",
        "Total number of janitor task executions",
        &["task", "status"]
    )
    .expect("register janitor_runs_total");

    /// Janitor task duration in seconds
    pub static ref JANITOR_RUN_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "janitor_run_duration_seconds",
        "Janitor task execution time in seconds",
        &["task"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    )
    .expect("register janitor_run_duration_seconds");

    /// Individual ids the janitor failed to reclaim
    pub static ref JANITOR_ITEM_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "janitor_item_failures_total",
        "Total number of per-item janitor failures",
        &["task"]
    )
    .expect("register janitor_item_failures_total");

    /// Blobs removed because no metadata referenced them
    pub static ref ORPHAN_BLOBS_REMOVED_TOTAL: IntCounter = register_int_counter!(
        "orphan_blobs_removed_total",
        "Total number of orphaned blobs removed"
    )
    .expect("register orphan_blobs_removed_total");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a created drop
pub fn record_drop_created(size: u64) {
    DROPS_CREATED_TOTAL.inc();
    DROP_BYTES_UPLOADED_TOTAL.inc_by(size);
}

pub fn record_drop_downloaded() {
    DROPS_DOWNLOADED_TOTAL.inc();
}

/// Record a deleted drop
pub fn record_drop_deleted(reason: DeleteReason) {
    DROPS_DELETED_TOTAL
        .with_label_values(&[reason.as_str()])
        .inc();
}

/// Record a janitor task execution
pub fn record_janitor_run(task: &str, success: bool, duration: f64) {
    JANITOR_RUNS_TOTAL
        .with_label_values(&[task, if success { "success" } else { "failure" }])
        .inc();
    JANITOR_RUN_DURATION_SECONDS
        .with_label_values(&[task])
        .observe(duration);
}

pub fn record_janitor_item_failure(task: &str) {
    JANITOR_ITEM_FAILURES_TOTAL.with_label_values(&[task]).inc();
}

pub fn record_orphan_removed() {
    ORPHAN_BLOBS_REMOVED_TOTAL.inc();
}

pub fn set_storage_usage(drops: i64, bytes: i64) {
    DROPS_STORED.set(drops);
    DROP_BYTES_STORED.set(bytes);
}

/// Why a drop left the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    Explicit,
    Expired,
    Exhausted,
}

impl DeleteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteReason::Explicit => "explicit",
            DeleteReason::Expired => "expired",
            DeleteReason::Exhausted => "exhausted",
        }
    }
}
