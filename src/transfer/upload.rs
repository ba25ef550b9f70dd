use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunk::ChunkPlanner;
use crate::config::TransferConfig;
use crate::metrics::{record_chunk_uploaded, record_registry_write_failure, TransferMetrics};
use crate::owner::OwnerProfile;
use crate::registry::{TransferRecord, TransferRegistry};
use crate::storage::{ChunkLocation, DirectUploadPort, RelayPort};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::handle::{EventSink, ProgressHub, ProgressReporter, TransferHandle};
use crate::transfer::session::TransferSession;
use crate::transfer::types::{Direction, UploadReceipt, UploadSource, UploadStrategy};

/// Drives upload sessions through the relay or direct strategy.
pub struct UploadCoordinator {
    planner: ChunkPlanner,
    upload_concurrency: usize,
    relay: Option<Arc<dyn RelayPort>>,
    direct: Option<Arc<dyn DirectUploadPort>>,
    registry: Option<TransferRegistry>,
    owner: Arc<OwnerProfile>,
    hub: Option<ProgressHub>,

    // Cancel triggers for sessions still running
    active: Arc<DashMap<String, CancellationToken>>,
}

impl Clone for UploadCoordinator {
    fn clone(&self) -> Self {
        Self {
            planner: self.planner,
            upload_concurrency: self.upload_concurrency,
            relay: self.relay.clone(),
            direct: self.direct.clone(),
            registry: self.registry.clone(),
            owner: Arc::clone(&self.owner),
            hub: self.hub.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

/// Where the chunks ended up
struct StoredUpload {
    transfer_id: String,
    file_type: String,
}

impl UploadCoordinator {
    pub fn new(config: &TransferConfig) -> TransferResult<Self> {
        Ok(Self {
            planner: ChunkPlanner::new(config.planner)?,
            upload_concurrency: config.upload_concurrency.max(1),
            relay: None,
            direct: None,
            registry: None,
            owner: Arc::new(OwnerProfile::anonymous()),
            hub: None,
            active: Arc::new(DashMap::new()),
        })
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayPort>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_direct(mut self, direct: Arc<dyn DirectUploadPort>) -> Self {
        self.direct = Some(direct);
        self
    }

    /// Record completed uploads in `registry`
    pub fn with_registry(mut self, registry: TransferRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_owner(mut self, owner: OwnerProfile) -> Self {
        self.owner = Arc::new(owner);
        self
    }

    pub fn with_progress_hub(mut self, hub: ProgressHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Session ids of uploads still running
    pub fn active_sessions(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns false if no such session is running
    pub fn cancel_transfer(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Start an upload on its own task
    pub fn start_upload(
        &self,
        source: UploadSource,
        strategy: UploadStrategy,
    ) -> TransferHandle<UploadReceipt> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        // Cancellable as soon as the id is returned
        self.active.insert(session_id.clone(), cancel.clone());
        let coordinator = self.clone();
        let worker_session_id = session_id.clone();
        let worker_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            coordinator
                .execute(source, strategy, worker_session_id, worker_cancel, Some(tx))
                .await
        });

        TransferHandle::new(session_id, rx, cancel, task)
    }

    /// Run an upload to completion on the caller's task
    pub async fn upload(
        &self,
        source: UploadSource,
        strategy: UploadStrategy,
        events: Option<EventSink<UploadReceipt>>,
    ) -> TransferResult<UploadReceipt> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        self.active.insert(session_id.clone(), cancel.clone());
        self.execute(source, strategy, session_id, cancel, events)
            .await
    }

    async fn execute(
        &self,
        source: UploadSource,
        strategy: UploadStrategy,
        session_id: String,
        cancel: CancellationToken,
        events: Option<EventSink<UploadReceipt>>,
    ) -> TransferResult<UploadReceipt> {
        let reporter = ProgressReporter::new(
            &session_id,
            Direction::Upload,
            &source.file_name,
            events,
            self.hub.clone(),
        );
        let metrics = TransferMetrics::start("upload");

        tracing::info!(
            session_id = %session_id,
            file = %source.file_name,
            size = source.size(),
            strategy = strategy.as_str(),
            "upload started"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.run(&source, strategy, &session_id, &reporter) => result,
        };

        self.active.remove(&session_id);
        match &result {
            Ok(receipt) => {
                metrics.complete();
                tracing::info!(session_id = %session_id, transfer_id = %receipt.transfer_id, "upload complete");
            }
            Err(e) => {
                metrics.fail(e.kind());
                tracing::error!(session_id = %session_id, file = %source.file_name, "upload failed: {}", e);
            }
        }
        reporter.finish(&result);
        result
    }

    async fn run(
        &self,
        source: &UploadSource,
        strategy: UploadStrategy,
        session_id: &str,
        reporter: &ProgressReporter<UploadReceipt>,
    ) -> TransferResult<UploadReceipt> {
        let plan = self.planner.plan(source.size(), source.requested_chunk_size)?;
        let chunks = ChunkPlanner::split(&plan, &source.data)?;
        let mut session = TransferSession::for_upload(&source.file_name, &plan).with_id(session_id);
        session.start()?;

        tracing::debug!(
            session_id,
            chunk_size = plan.chunk_size,
            chunks = plan.chunk_count,
            "upload planned"
        );

        let stored = match strategy {
            UploadStrategy::Relay => self.upload_relay(&mut session, source, chunks, reporter).await,
            UploadStrategy::Direct => self.upload_direct(&mut session, source, chunks, reporter).await,
        };
        let stored = match stored {
            Ok(stored) => stored,
            Err(e) => {
                session.fail(e.to_string());
                return Err(e);
            }
        };
        session.complete()?;

        let receipt = UploadReceipt {
            transfer_id: stored.transfer_id,
            file_name: source.file_name.clone(),
            file_type: stored.file_type,
            size_bytes: source.size(),
        };
        self.record(&receipt).await;
        Ok(receipt)
    }

    /// One chunk at a time, in index order. The transfer id assigned on the
    /// first response is carried on every later request.
    async fn upload_relay(
        &self,
        session: &mut TransferSession,
        source: &UploadSource,
        chunks: Vec<Bytes>,
        reporter: &ProgressReporter<UploadReceipt>,
    ) -> TransferResult<StoredUpload> {
        let relay = self
            .relay
            .as_ref()
            .ok_or(TransferError::StrategyUnavailable("relay"))?;
        let endpoint = relay.relay_endpoint();
        let total = session.total_chunks();
        let mut transfer_id: Option<String> = None;
        let mut file_type = source.file_type.clone();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let index = index as u32;
            let size = chunk.len();
            session.assign_location(index, ChunkLocation::Relay(endpoint.clone()))?;
            session.mark_in_flight(index)?;

            let receipt = match relay
                .upload_chunk_relay(chunk, &source.file_name, index, total, transfer_id.as_deref())
                .await
            {
                Ok(receipt) => receipt,
                Err(err) => {
                    session.mark_failed(index)?;
                    return Err(TransferError::ChunkTransfer { index, source: err });
                }
            };

            match &transfer_id {
                None => transfer_id = Some(receipt.transfer_id),
                Some(id) if *id != receipt.transfer_id => {
                    tracing::warn!(expected = %id, got = %receipt.transfer_id, "relay changed transfer id mid-upload");
                }
                Some(_) => {}
            }
            if !receipt.file_type.is_empty() {
                file_type = receipt.file_type;
            }

            let done = session.mark_done(index)?;
            record_chunk_uploaded("relay", size);
            tracing::debug!(session_id = session.id(), index, total, "relay chunk stored");
            reporter.progress(done, total);
        }

        let transfer_id = transfer_id
            .ok_or_else(|| TransferError::InvalidState("relay returned no transfer id".into()))?;
        Ok(StoredUpload {
            transfer_id,
            file_type,
        })
    }

    /// Chunks go straight to their pre-signed locations, several at once.
    /// The first failure abandons the rest; completion is called once, after
    /// every chunk is stored.
    async fn upload_direct(
        &self,
        session: &mut TransferSession,
        source: &UploadSource,
        chunks: Vec<Bytes>,
        reporter: &ProgressReporter<UploadReceipt>,
    ) -> TransferResult<StoredUpload> {
        let port = self
            .direct
            .as_ref()
            .ok_or(TransferError::StrategyUnavailable("direct"))?;
        let total = session.total_chunks();

        let grant = port
            .init_direct_upload(&source.file_name, &source.file_type, source.size(), total)
            .await?;
        let locations = grant.ordered_locations(total).ok_or_else(|| {
            TransferError::InvalidGrant(format!(
                "expected one location for each of {} chunks, got {} entries",
                total,
                grant.chunk_upload_locations.len()
            ))
        })?;

        for (index, location) in locations.iter().enumerate() {
            let index = index as u32;
            session.assign_location(index, ChunkLocation::Presigned(location.clone()))?;
            session.mark_in_flight(index)?;
        }

        let content_type = source.file_type.clone();
        let mut puts = stream::iter(chunks.into_iter().zip(locations).enumerate())
            .map(|(index, (chunk, location))| {
                let port = Arc::clone(port);
                let content_type = content_type.clone();
                async move {
                    let size = chunk.len();
                    let result = port.upload_chunk_direct(&location, chunk, &content_type).await;
                    (index as u32, size, result)
                }
            })
            .buffer_unordered(self.upload_concurrency);

        // Single writer: completions are counted here as each PUT resolves
        while let Some((index, size, result)) = puts.next().await {
            match result {
                Ok(()) => {
                    let done = session.mark_done(index)?;
                    record_chunk_uploaded("direct", size);
                    tracing::debug!(session_id = session.id(), index, done, total, "direct chunk stored");
                    reporter.progress(done, total);
                }
                Err(err) => {
                    session.mark_failed(index)?;
                    return Err(TransferError::ChunkTransfer { index, source: err });
                }
            }
        }
        drop(puts);

        if let Err(err) = port.complete_direct_upload(&grant.completion_location).await {
            tracing::error!(
                transfer_id = %grant.transfer_id,
                "all chunks stored but completion failed; remote chunks need cleanup"
            );
            return Err(TransferError::PostUploadReconciliation {
                transfer_id: grant.transfer_id,
                source: err,
            });
        }

        Ok(StoredUpload {
            transfer_id: grant.transfer_id,
            file_type: source.file_type.clone(),
        })
    }

    /// History is best-effort: a failed write never fails a stored upload.
    async fn record(&self, receipt: &UploadReceipt) {
        let Some(registry) = &self.registry else {
            return;
        };
        let record = TransferRecord::new(
            receipt.transfer_id.clone(),
            receipt.file_name.clone(),
            receipt.file_type.clone(),
            receipt.size_bytes,
            self.owner.user_id.clone(),
        );
        if let Err(e) = registry.append(record).await {
            record_registry_write_failure();
            tracing::error!(transfer_id = %receipt.transfer_id, "failed to record upload: {}", e);
        }
    }
}
