//! Prometheus metrics for the rebalancer
//!
//! Metrics go through the `metrics` facade. The daemon installs the
//! Prometheus exporter; without it every call here is a no-op.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names as constants
pub mod names {
    // Relocation metrics
    pub const RELOCATIONS_TOTAL: &str = "segstore_relocations_total";
    pub const RELOCATION_FAILURES_TOTAL: &str = "segstore_relocation_failures_total";
    pub const RELOCATION_SKIPPED_TOTAL: &str = "segstore_relocation_skipped_total";
    pub const BYTES_MOVED_TOTAL: &str = "segstore_bytes_moved_total";

    // Share metrics
    pub const SHARE_FREE_BYTES: &str = "segstore_share_free_bytes";
    pub const SCRATCH_EVICTIONS_TOTAL: &str = "segstore_scratch_evictions_total";

    // Scheduler metrics
    pub const TICKS_TOTAL: &str = "segstore_scheduler_ticks_total";
}

/// Initialize metric descriptions
pub fn init_metrics() {
    describe_counter!(
        names::RELOCATIONS_TOTAL,
        "Data sets relocated to another share"
    );
    describe_counter!(
        names::RELOCATION_FAILURES_TOTAL,
        "Relocations that failed during transfer or verification"
    );
    describe_counter!(
        names::RELOCATION_SKIPPED_TOTAL,
        "Data sets skipped for lack of a target or because they moved"
    );
    describe_counter!(names::BYTES_MOVED_TOTAL, "Verified bytes relocated");
    describe_gauge!(
        names::SHARE_FREE_BYTES,
        "Free bytes of a share at its last query"
    );
    describe_counter!(
        names::SCRATCH_EVICTIONS_TOTAL,
        "Data sets evicted from unarchiving scratch shares"
    );
    describe_counter!(names::TICKS_TOTAL, "Scheduler ticks run");
    describe_counter!(
        segstore_archiver::task::METRIC_BATCHES_SELECTED,
        "Archive batches selected"
    );
    describe_counter!(
        segstore_archiver::task::METRIC_BATCH_DATA_SETS,
        "Data sets put into archive batches"
    );
}

/// Install the Prometheus recorder with its HTTP listener
pub fn install_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    init_metrics();
    info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_relocation(source: &str, destination: &str, bytes: u64) {
    counter!(names::RELOCATIONS_TOTAL, "source" => source.to_string(), "destination" => destination.to_string())
        .increment(1);
    counter!(names::BYTES_MOVED_TOTAL).increment(bytes);
}

pub fn record_failure(source: &str) {
    counter!(names::RELOCATION_FAILURES_TOTAL, "source" => source.to_string()).increment(1);
}

pub fn record_skip(source: &str, reason: &'static str) {
    counter!(names::RELOCATION_SKIPPED_TOTAL, "source" => source.to_string(), "reason" => reason)
        .increment(1);
}

pub fn record_free_space(share: &str, bytes: u64) {
    gauge!(names::SHARE_FREE_BYTES, "share" => share.to_string()).set(bytes as f64);
}

pub fn record_evictions(share: &str, count: usize) {
    counter!(names::SCRATCH_EVICTIONS_TOTAL, "share" => share.to_string()).increment(count as u64);
}

pub fn record_tick() {
    counter!(names::TICKS_TOTAL).increment(1);
}
