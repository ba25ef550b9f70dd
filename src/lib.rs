//! Chunked file transfer: planning, relay and direct uploads, batched
//! downloads with per-chunk retry, and a bounded upload history.

pub mod api;
pub mod chunk;
pub mod config;
pub mod metrics;
pub mod owner;
pub mod registry;
pub mod storage;
pub mod transfer;

pub use chunk::{ChunkPlan, ChunkPlanner, PlannerLimits, PlanningError};
pub use config::TransferConfig;
pub use registry::{TransferRecord, TransferRegistry};
pub use transfer::{
    Artifact, DownloadCoordinator, TransferError, TransferHandle, TransferResult, UploadCoordinator,
    UploadReceipt, UploadSource, UploadStrategy,
};
