use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::metrics::{record_chunk_downloaded, record_chunk_retry, TransferMetrics};
use crate::storage::{DownloadPort, StorageError};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::handle::{EventSink, ProgressHub, ProgressReporter, TransferHandle};
use crate::transfer::session::TransferSession;
use crate::transfer::types::{Artifact, Direction};

/// Fetches chunked files and reassembles them in index order.
pub struct DownloadCoordinator {
    port: Arc<dyn DownloadPort>,
    batch_size: usize,
    max_attempts: u32,
    retry_delay: Duration,
    hub: Option<ProgressHub>,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl Clone for DownloadCoordinator {
    fn clone(&self) -> Self {
        Self {
            port: Arc::clone(&self.port),
            batch_size: self.batch_size,
            max_attempts: self.max_attempts,
            retry_delay: self.retry_delay,
            hub: self.hub.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl DownloadCoordinator {
    pub fn new(port: Arc<dyn DownloadPort>, config: &TransferConfig) -> Self {
        Self {
            port,
            batch_size: config.download_batch_size.max(1),
            max_attempts: config.max_fetch_attempts.max(1),
            retry_delay: config.retry_initial_delay(),
            hub: None,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn with_progress_hub(mut self, hub: ProgressHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    pub fn cancel_transfer(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Start a download on its own task
    pub fn start_download(&self, transfer_id: &str) -> TransferHandle<Artifact> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        // Cancellable as soon as the id is returned
        self.active.insert(session_id.clone(), cancel.clone());
        let coordinator = self.clone();
        let transfer_id = transfer_id.to_string();
        let worker_session_id = session_id.clone();
        let worker_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            coordinator
                .execute(&transfer_id, worker_session_id, worker_cancel, Some(tx))
                .await
        });

        TransferHandle::new(session_id, rx, cancel, task)
    }

    /// Run a download to completion on the caller's task
    pub async fn download(
        &self,
        transfer_id: &str,
        events: Option<EventSink<Artifact>>,
    ) -> TransferResult<Artifact> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        self.active.insert(session_id.clone(), cancel.clone());
        self.execute(transfer_id, session_id, cancel, events)
            .await
    }

    async fn execute(
        &self,
        transfer_id: &str,
        session_id: String,
        cancel: CancellationToken,
        events: Option<EventSink<Artifact>>,
    ) -> TransferResult<Artifact> {
        let mut reporter = ProgressReporter::new(
            &session_id,
            Direction::Download,
            transfer_id,
            events,
            self.hub.clone(),
        );
        reporter.set_transfer_id(transfer_id);
        let metrics = TransferMetrics::start("download");
        tracing::info!(session_id = %session_id, transfer_id, "download started");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.run(transfer_id, &session_id, &mut reporter) => result,
        };

        self.active.remove(&session_id);
        match &result {
            Ok(artifact) => {
                metrics.complete();
                tracing::info!(
                    session_id = %session_id,
                    file = %artifact.file_name,
                    size = artifact.size(),
                    "download complete"
                );
            }
            Err(e) => {
                metrics.fail(e.kind());
                tracing::error!(session_id = %session_id, transfer_id, "download failed: {}", e);
            }
        }
        reporter.finish(&result);
        result
    }

    async fn run(
        &self,
        transfer_id: &str,
        session_id: &str,
        reporter: &mut ProgressReporter<Artifact>,
    ) -> TransferResult<Artifact> {
        let manifest = self
            .port
            .fetch_manifest(transfer_id)
            .await
            .map_err(|e| TransferError::Manifest {
                message: e.readable_message(),
            })?;
        if manifest.chunk_locations.is_empty() {
            return Err(TransferError::Manifest {
                message: format!("manifest for {transfer_id} lists no chunks"),
            });
        }
        reporter.set_file_name(&manifest.file_name);

        let mut session = TransferSession::for_download(&manifest.file_name, &manifest.chunk_locations)
            .with_id(session_id);
        session.start()?;
        let total = session.total_chunks();

        // One slot per index; only this task writes to it
        let mut slots: Vec<Option<Bytes>> = vec![None; total as usize];
        let indices: Vec<u32> = (0..total).collect();

        for batch in indices.chunks(self.batch_size) {
            let mut pending = FuturesUnordered::new();
            for &index in batch {
                session.mark_in_flight(index)?;
                let location = manifest.chunk_locations[index as usize].clone();
                pending.push(self.fetch_with_retry(index, location));
            }

            let mut batch_failed = false;
            while let Some((index, result)) = pending.next().await {
                match result {
                    Ok(bytes) => {
                        slots[index as usize] = Some(bytes);
                        let filled = session.mark_done(index)?;
                        reporter.progress(filled, total);
                    }
                    Err(err) => {
                        tracing::error!(session_id, index, "chunk fetch gave up: {}", err);
                        session.mark_failed(index)?;
                        batch_failed = true;
                    }
                }
            }

            // A chunk that exhausted its retries makes the artifact impossible
            if batch_failed {
                break;
            }
        }

        let missing: Vec<u32> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index as u32)
            .collect();
        if !missing.is_empty() {
            let err = TransferError::IncompleteTransfer { missing, total };
            session.fail(err.to_string());
            return Err(err);
        }

        let sizes: Vec<u64> = slots
            .iter()
            .map(|slot| slot.as_ref().map_or(0, |b| b.len() as u64))
            .collect();
        session.assign_ranges(&sizes)?;
        session.complete()?;

        let mut data = BytesMut::with_capacity(session.total_bytes().unwrap_or(0) as usize);
        for chunk in slots.into_iter().flatten() {
            data.extend_from_slice(&chunk);
        }

        Ok(Artifact {
            transfer_id: transfer_id.to_string(),
            file_name: manifest.file_name,
            content_type: manifest.file_type,
            data: data.freeze(),
        })
    }

    /// Up to `max_attempts` fetches with exponential delays in between.
    /// Each chunk has its own budget.
    async fn fetch_with_retry(&self, index: u32, location: String) -> (u32, Result<Bytes, StorageError>) {
        let mut delays = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_delay)
            .with_max_elapsed_time(None)
            .build();
        let mut attempt = 1;

        loop {
            match self.port.fetch_chunk(&location).await {
                Ok(bytes) => {
                    record_chunk_downloaded(bytes.len());
                    tracing::debug!(index, attempt, size = bytes.len(), "chunk fetched");
                    return (index, Ok(bytes));
                }
                Err(err) if attempt < self.max_attempts => {
                    let delay = delays.next_backoff().unwrap_or(self.retry_delay);
                    record_chunk_retry();
                    tracing::warn!(index, attempt, ?delay, "chunk fetch failed, retrying: {}", err);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return (index, Err(err)),
            }
        }
    }
}
