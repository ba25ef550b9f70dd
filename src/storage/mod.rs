//! Boundary to the relay server and object storage.
//!
//! The coordinators only ever talk to these traits; `HttpStorage` speaks the
//! real HTTP routes and `MemoryStorage` keeps everything in-process.

pub mod error;
pub mod http;
pub mod memory;
pub mod types;

pub use error::{ErrorEnvelope, StorageError, StorageResult};
pub use http::HttpStorage;
pub use memory::MemoryStorage;
pub use types::{ChunkLocation, DirectUploadGrant, IndexedLocation, Manifest, RelayReceipt};

use async_trait::async_trait;
use bytes::Bytes;

/// Uploads that go straight to object storage through pre-signed locations
#[async_trait]
pub trait DirectUploadPort: Send + Sync {
    async fn init_direct_upload(
        &self,
        file_name: &str,
        file_type: &str,
        file_size: u64,
        total_chunks: u32,
    ) -> StorageResult<DirectUploadGrant>;

    async fn upload_chunk_direct(
        &self,
        location: &str,
        chunk: Bytes,
        content_type: &str,
    ) -> StorageResult<()>;

    async fn complete_direct_upload(&self, completion_location: &str) -> StorageResult<()>;
}

/// Uploads that pass through the relay server
#[async_trait]
pub trait RelayPort: Send + Sync {
    /// Where relay chunks are posted; recorded on each chunk descriptor
    fn relay_endpoint(&self) -> String;

    async fn upload_chunk_relay(
        &self,
        chunk: Bytes,
        file_name: &str,
        chunk_index: u32,
        total_chunks: u32,
        transfer_id: Option<&str>,
    ) -> StorageResult<RelayReceipt>;
}

#[async_trait]
pub trait DownloadPort: Send + Sync {
    async fn fetch_manifest(&self, transfer_id: &str) -> StorageResult<Manifest>;

    async fn fetch_chunk(&self, location: &str) -> StorageResult<Bytes>;

    async fn delete_remote_file(&self, transfer_id: &str) -> StorageResult<()>;
}
