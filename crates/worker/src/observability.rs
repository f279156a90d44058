use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const BATCHES_TOTAL: &str = "pulse_worker_batches_total";
const EVENTS_PROCESSED_TOTAL: &str = "pulse_worker_events_processed_total";
const EVENTS_SKIPPED_TOTAL: &str = "pulse_worker_events_skipped_total";
const BATCH_DURATION_MS: &str = "pulse_worker_batch_duration_ms";
const STREAM_PENDING_GAUGE: &str = "pulse_worker_stream_pending_total";
const RECORDS_PRUNED_TOTAL: &str = "pulse_worker_records_pruned_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn _render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_batch(result: &str, processed: usize, skipped: usize, duration_ms: f64) {
    counter!(BATCHES_TOTAL, "result" => result.to_string()).increment(1);
    counter!(EVENTS_PROCESSED_TOTAL).increment(processed as u64);
    if skipped > 0 {
        counter!(EVENTS_SKIPPED_TOTAL).increment(skipped as u64);
    }
    histogram!(BATCH_DURATION_MS, "result" => result.to_string()).record(duration_ms.max(0.0));
}

pub fn set_stream_pending(pending: u64) {
    gauge!(STREAM_PENDING_GAUGE).set(pending as f64);
}

pub fn register_pruned(table: &str, removed: usize) {
    counter!(RECORDS_PRUNED_TOTAL, "table" => table.to_string()).increment(removed as u64);
}
