//! In-process object store implementing every storage port.
//!
//! Used by the test suite and for local runs without a backend. Faults can be
//! injected per location to exercise retry, abort and reconciliation paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::error::{ErrorEnvelope, StorageError, StorageResult};
use super::types::{DirectUploadGrant, IndexedLocation, Manifest, RelayReceipt};
use super::{DirectUploadPort, DownloadPort, RelayPort};

const BUCKET: &str = "memory";

#[derive(Debug, Clone)]
struct StoredFile {
    file_name: String,
    file_type: String,
    total_chunks: u32,
    complete: bool,
}

#[derive(Debug, Default)]
struct Faults {
    /// location -> remaining failures
    fetch: HashMap<String, u32>,
    upload: HashMap<String, u32>,
    relay: HashMap<u32, u32>,
    fetch_delay: HashMap<String, Duration>,
    fail_completion: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<DashMap<String, Bytes>>,
    files: Arc<DashMap<String, StoredFile>>,
    faults: Arc<Mutex<Faults>>,
    fetch_attempts: Arc<DashMap<String, u32>>,
    completion_calls: Arc<AtomicU32>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn object_key(transfer_id: &str, index: u32) -> String {
        format!("{transfer_id}/chunk_{index}")
    }

    /// Location a download fetches chunk `index` of `transfer_id` from
    pub fn chunk_location(transfer_id: &str, index: u32) -> String {
        format!("mem://object/{}", Self::object_key(transfer_id, index))
    }

    pub fn upload_location(transfer_id: &str, index: u32) -> String {
        format!("mem://upload/{}", Self::object_key(transfer_id, index))
    }

    fn completion_location(transfer_id: &str) -> String {
        format!("mem://complete/{transfer_id}")
    }

    /// Store a complete file directly, bypassing the upload paths
    pub fn insert_file(&self, transfer_id: &str, file_name: &str, file_type: &str, chunks: Vec<Bytes>) {
        let total_chunks = chunks.len() as u32;
        for (index, chunk) in chunks.into_iter().enumerate() {
            self.objects
                .insert(Self::object_key(transfer_id, index as u32), chunk);
        }
        self.files.insert(
            transfer_id.to_string(),
            StoredFile {
                file_name: file_name.to_string(),
                file_type: file_type.to_string(),
                total_chunks,
                complete: true,
            },
        );
    }

    pub fn fail_fetch(&self, location: &str, times: u32) {
        self.faults.lock().fetch.insert(location.to_string(), times);
    }

    pub fn fail_upload(&self, location: &str, times: u32) {
        self.faults.lock().upload.insert(location.to_string(), times);
    }

    pub fn fail_relay_chunk(&self, index: u32, times: u32) {
        self.faults.lock().relay.insert(index, times);
    }

    pub fn delay_fetch(&self, location: &str, delay: Duration) {
        self.faults
            .lock()
            .fetch_delay
            .insert(location.to_string(), delay);
    }

    pub fn fail_completion(&self, fail: bool) {
        self.faults.lock().fail_completion = fail;
    }

    pub fn fetch_attempts(&self, location: &str) -> u32 {
        self.fetch_attempts.get(location).map(|v| *v).unwrap_or(0)
    }

    pub fn completion_calls(&self) -> u32 {
        self.completion_calls.load(Ordering::SeqCst)
    }

    /// Highest number of chunk fetches observed running at the same time
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_complete(&self, transfer_id: &str) -> bool {
        self.files
            .get(transfer_id)
            .map(|f| f.complete)
            .unwrap_or(false)
    }

    /// Consume one pending failure for `key`, if any.
    fn take_fault<K: std::hash::Hash + Eq>(map: &mut HashMap<K, u32>, key: &K) -> bool {
        match map.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn missing(code: &str, message: &str, key: &str) -> StorageError {
        StorageError::Remote(ErrorEnvelope {
            error_code: code.to_string(),
            error_message: message.to_string(),
            resource_key: key.to_string(),
            container_name: BUCKET.to_string(),
        })
    }
}

#[async_trait]
impl RelayPort for MemoryStorage {
    fn relay_endpoint(&self) -> String {
        "mem://relay".to_string()
    }

    async fn upload_chunk_relay(
        &self,
        chunk: Bytes,
        file_name: &str,
        chunk_index: u32,
        total_chunks: u32,
        transfer_id: Option<&str>,
    ) -> StorageResult<RelayReceipt> {
        if Self::take_fault(&mut self.faults.lock().relay, &chunk_index) {
            return Err(StorageError::Injected(format!(
                "relay rejected chunk {chunk_index}"
            )));
        }

        let transfer_id = match transfer_id {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let file_type = mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .to_string();

        self.objects
            .insert(Self::object_key(&transfer_id, chunk_index), chunk);

        let mut entry = self
            .files
            .entry(transfer_id.clone())
            .or_insert_with(|| StoredFile {
                file_name: file_name.to_string(),
                file_type: file_type.clone(),
                total_chunks,
                complete: false,
            });
        let received = (0..entry.total_chunks)
            .filter(|i| self.objects.contains_key(&Self::object_key(&transfer_id, *i)))
            .count() as u32;
        entry.complete = received == entry.total_chunks;

        Ok(RelayReceipt {
            transfer_id,
            file_name: file_name.to_string(),
            file_type,
        })
    }
}

#[async_trait]
impl DirectUploadPort for MemoryStorage {
    async fn init_direct_upload(
        &self,
        file_name: &str,
        file_type: &str,
        _file_size: u64,
        total_chunks: u32,
    ) -> StorageResult<DirectUploadGrant> {
        let transfer_id = uuid::Uuid::new_v4().simple().to_string();
        self.files.insert(
            transfer_id.clone(),
            StoredFile {
                file_name: file_name.to_string(),
                file_type: file_type.to_string(),
                total_chunks,
                complete: false,
            },
        );

        Ok(DirectUploadGrant {
            chunk_upload_locations: (0..total_chunks)
                .map(|index| IndexedLocation {
                    index,
                    location: Self::upload_location(&transfer_id, index),
                })
                .collect(),
            completion_location: Self::completion_location(&transfer_id),
            transfer_id,
        })
    }

    async fn upload_chunk_direct(
        &self,
        location: &str,
        chunk: Bytes,
        _content_type: &str,
    ) -> StorageResult<()> {
        if Self::take_fault(&mut self.faults.lock().upload, &location.to_string()) {
            return Err(StorageError::Injected(format!("upload to {location} rejected")));
        }
        let key = location
            .strip_prefix("mem://upload/")
            .ok_or_else(|| StorageError::InvalidResponse(format!("unknown location {location}")))?;
        self.objects.insert(key.to_string(), chunk);
        Ok(())
    }

    async fn complete_direct_upload(&self, completion_location: &str) -> StorageResult<()> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().fail_completion {
            return Err(StorageError::Status {
                status: 500,
                body: "completion callback failed".into(),
            });
        }

        let transfer_id = completion_location
            .strip_prefix("mem://complete/")
            .ok_or_else(|| StorageError::NotFound(completion_location.to_string()))?;
        let mut file = self
            .files
            .get_mut(transfer_id)
            .ok_or_else(|| StorageError::NotFound(transfer_id.to_string()))?;

        for index in 0..file.total_chunks {
            if !self.objects.contains_key(&Self::object_key(transfer_id, index)) {
                return Err(StorageError::Status {
                    status: 400,
                    body: "Missing chunks".into(),
                });
            }
        }
        file.complete = true;
        Ok(())
    }
}

#[async_trait]
impl DownloadPort for MemoryStorage {
    async fn fetch_manifest(&self, transfer_id: &str) -> StorageResult<Manifest> {
        let file = self
            .files
            .get(transfer_id)
            .filter(|f| f.complete)
            .map(|f| f.value().clone())
            .ok_or_else(|| {
                Self::missing("NoSuchKey", "The specified key does not exist.", transfer_id)
            })?;

        Ok(Manifest {
            file_name: file.file_name,
            file_type: file.file_type,
            chunk_locations: (0..file.total_chunks)
                .map(|i| Self::chunk_location(transfer_id, i))
                .collect(),
        })
    }

    async fn fetch_chunk(&self, location: &str) -> StorageResult<Bytes> {
        *self.fetch_attempts.entry(location.to_string()).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (fail, delay) = {
            let mut faults = self.faults.lock();
            let fail = Self::take_fault(&mut faults.fetch, &location.to_string());
            (fail, faults.fetch_delay.get(location).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if fail {
            return Err(StorageError::Injected(format!("fetch of {location} failed")));
        }

        let key = location.strip_prefix("mem://object/").unwrap_or(location);
        self.objects
            .get(key)
            .map(|b| b.value().clone())
            .ok_or_else(|| Self::missing("NoSuchKey", "The specified key does not exist.", key))
    }

    async fn delete_remote_file(&self, transfer_id: &str) -> StorageResult<()> {
        let (_, file) = self
            .files
            .remove(transfer_id)
            .ok_or_else(|| StorageError::NotFound(transfer_id.to_string()))?;
        for index in 0..file.total_chunks {
            self.objects.remove(&Self::object_key(transfer_id, index));
        }
        Ok(())
    }
}
