//! Upload and download coordination over the storage ports.

pub mod download;
pub mod error;
pub mod handle;
pub mod session;
pub mod types;
pub mod upload;

pub use download::DownloadCoordinator;
pub use error::{TransferError, TransferResult};
pub use handle::{EventSink, ProgressHub, TransferHandle};
pub use session::TransferSession;
pub use types::{
    Artifact, ChunkDescriptor, ChunkStatus, Direction, HubEvent, ProgressUpdate, SessionStatus,
    TransferEvent, TransferOutcome, TransferOutput, UploadReceipt, UploadSource, UploadStrategy,
};
pub use upload::UploadCoordinator;
