//! Prometheus metrics for chunked transfers
//!
//! Key metrics exposed:
//! - Chunks and bytes moved per direction
//! - Fetch retries
//! - Transfer outcomes, duration and the number in flight

pub mod exporter;
pub mod recorder;

pub use exporter::{install_recorder, metrics_route, render_metrics, MetricsError};
pub use recorder::{
    init_metrics, record_chunk_downloaded, record_chunk_retry, record_chunk_uploaded,
    record_registry_write_failure, TransferMetrics,
};
