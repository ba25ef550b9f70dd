//! Metrics recorder for chunked transfers

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!(
        "storely_chunks_uploaded_total",
        "Total number of chunks accepted by storage"
    );
    describe_counter!(
        "storely_chunks_downloaded_total",
        "Total number of chunks fetched from storage"
    );
    describe_counter!(
        "storely_chunk_retries_total",
        "Chunk fetch attempts beyond the first"
    );
    describe_counter!("storely_bytes_uploaded_total", "Total bytes uploaded");
    describe_counter!("storely_bytes_downloaded_total", "Total bytes downloaded");

    describe_counter!(
        "storely_transfers_completed_total",
        "Total number of transfers completed successfully"
    );
    describe_counter!(
        "storely_transfers_failed_total",
        "Total number of transfers that failed"
    );
    describe_counter!(
        "storely_registry_write_failures_total",
        "Registry writes that failed after a successful upload"
    );

    describe_gauge!(
        "storely_active_transfers",
        "Number of currently active transfers"
    );

    describe_histogram!(
        "storely_transfer_duration_seconds",
        "Total transfer duration"
    );
}

/// Record a chunk accepted by storage
pub fn record_chunk_uploaded(strategy: &str, chunk_size: usize) {
    counter!("storely_chunks_uploaded_total", "strategy" => strategy.to_string()).increment(1);
    counter!("storely_bytes_uploaded_total").increment(chunk_size as u64);
}

/// Record a chunk fetched from storage
pub fn record_chunk_downloaded(chunk_size: usize) {
    counter!("storely_chunks_downloaded_total").increment(1);
    counter!("storely_bytes_downloaded_total").increment(chunk_size as u64);
}

pub fn record_chunk_retry() {
    counter!("storely_chunk_retries_total").increment(1);
}

pub fn record_registry_write_failure() {
    counter!("storely_registry_write_failures_total").increment(1);
}

/// Tracks one transfer from start to a terminal outcome.
///
/// The active-transfer gauge is incremented on `start` and decremented exactly
/// once, by `complete`, `fail`, or on drop if neither was called.
pub struct TransferMetrics {
    direction: &'static str,
    start_time: Instant,
    finished: bool,
}

impl TransferMetrics {
    pub fn start(direction: &'static str) -> Self {
        gauge!("storely_active_transfers", "direction" => direction).increment(1.0);
        Self {
            direction,
            start_time: Instant::now(),
            finished: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn complete(mut self) {
        self.finished = true;
        counter!("storely_transfers_completed_total", "direction" => self.direction).increment(1);
        histogram!("storely_transfer_duration_seconds", "direction" => self.direction)
            .record(self.elapsed().as_secs_f64());
        gauge!("storely_active_transfers", "direction" => self.direction).decrement(1.0);
    }

    pub fn fail(mut self, reason: &'static str) {
        self.finished = true;
        counter!(
            "storely_transfers_failed_total",
            "direction" => self.direction,
            "reason" => reason
        )
        .increment(1);
        gauge!("storely_active_transfers", "direction" => self.direction).decrement(1.0);
    }
}

impl Drop for TransferMetrics {
    fn drop(&mut self) {
        if !self.finished {
            gauge!("storely_active_transfers", "direction" => self.direction).decrement(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(METRICS_INITIALIZED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_transfer_metrics_without_recorder() {
        // No recorder installed: calls are no-ops but must not panic
        let tracker = TransferMetrics::start("upload");
        assert!(tracker.elapsed() < Duration::from_secs(5));
        tracker.complete();

        TransferMetrics::start("download").fail("manifest");
        drop(TransferMetrics::start("download"));
    }
}
