use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::chunk::ByteRange;
use crate::storage::ChunkLocation;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u32,
    /// Known at plan time for uploads, at reassembly for downloads
    pub byte_range: Option<ByteRange>,
    pub location: Option<ChunkLocation>,
    pub status: ChunkStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    Planning,
    InProgress,
    Completed,
    Failed(String),
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Chunks pass through the relay server one at a time, in index order
    Relay,
    /// Chunks go straight to object storage via pre-signed locations
    Direct,
}

impl UploadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStrategy::Relay => "relay",
            UploadStrategy::Direct => "direct",
        }
    }
}

/// Progress notification for one transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub session_id: String,
    pub file_name: String,
    pub percent_complete: f32,
}

/// How a transfer ended, as seen by hub subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub session_id: String,
    pub direction: Direction,
    pub file_name: String,
    /// Known once the backend has assigned one
    pub transfer_id: Option<String>,
    /// `None` on success
    pub error: Option<String>,
    pub error_kind: Option<String>,
    /// Chunks are stored remotely but the file was never completed; the
    /// caller should delete `transfer_id`
    pub needs_reconciliation: bool,
}

impl TransferOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Published on the process-wide progress hub
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Progress(ProgressUpdate),
    Finished(TransferOutcome),
}

/// Values a finished transfer produces
pub trait TransferOutput {
    fn transfer_id(&self) -> &str;
}

impl TransferOutput for UploadReceipt {
    fn transfer_id(&self) -> &str {
        &self.transfer_id
    }
}

impl TransferOutput for Artifact {
    fn transfer_id(&self) -> &str {
        &self.transfer_id
    }
}

#[derive(Debug, Clone)]
pub enum TransferEvent<T> {
    Progress(ProgressUpdate),
    Completed(T),
    Failed(String),
}

impl<T> TransferEvent<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::Progress(_))
    }
}

/// A file to upload, fully buffered
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub file_name: String,
    pub file_type: String,
    pub data: Bytes,
    pub requested_chunk_size: Option<u64>,
}

impl UploadSource {
    pub fn from_bytes(file_name: &str, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.to_string(),
            file_type: mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .to_string(),
            data: data.into(),
            requested_chunk_size: None,
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Ok(Self::from_bytes(&file_name, data))
    }

    pub fn with_file_type(mut self, file_type: &str) -> Self {
        self.file_type = file_type.to_string();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.requested_chunk_size = Some(chunk_size);
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub transfer_id: String,
    pub file_name: String,
    pub file_type: String,
    pub size_bytes: u64,
}

/// Reassembled download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub transfer_id: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Artifact {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, &self.data).await
    }
}
