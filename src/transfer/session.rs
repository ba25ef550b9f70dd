use chrono::{DateTime, Utc};

use crate::chunk::{ByteRange, ChunkPlan};
use crate::storage::ChunkLocation;
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::types::{ChunkDescriptor, ChunkStatus, Direction, SessionStatus};

/// State of one file's multi-chunk transfer. Owned by a single coordinator
/// task; chunk bookkeeping happens only through `&mut self`.
#[derive(Debug, Clone)]
pub struct TransferSession {
    id: String,
    direction: Direction,
    file_name: String,
    chunks: Vec<ChunkDescriptor>,
    total_bytes: Option<u64>,
    completed_count: u32,
    status: SessionStatus,
    created_at: DateTime<Utc>,
}

impl TransferSession {
    /// Upload session: one descriptor per planned chunk, ranges fixed now
    pub fn for_upload(file_name: &str, plan: &ChunkPlan) -> Self {
        let chunks = plan
            .ranges()
            .enumerate()
            .map(|(index, range)| ChunkDescriptor {
                index: index as u32,
                byte_range: Some(range),
                location: None,
                status: ChunkStatus::Pending,
            })
            .collect();
        Self::new(Direction::Upload, file_name, chunks, Some(plan.file_size))
    }

    /// Download session: locations come from the manifest in index order
    pub fn for_download(file_name: &str, locations: &[String]) -> Self {
        let chunks = locations
            .iter()
            .enumerate()
            .map(|(index, location)| ChunkDescriptor {
                index: index as u32,
                byte_range: None,
                location: Some(ChunkLocation::Presigned(location.clone())),
                status: ChunkStatus::Pending,
            })
            .collect();
        Self::new(Direction::Download, file_name, chunks, None)
    }

    fn new(
        direction: Direction,
        file_name: &str,
        chunks: Vec<ChunkDescriptor>,
        total_bytes: Option<u64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            file_name: file_name.to_string(),
            chunks,
            total_bytes,
            completed_count: 0,
            status: SessionStatus::Planning,
            created_at: Utc::now(),
        }
    }

    /// Use an id chosen by the caller (e.g. one already handed out on a handle)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    pub fn chunk(&self, index: u32) -> Option<&ChunkDescriptor> {
        self.chunks.get(index as usize)
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn completed_count(&self) -> u32 {
        self.completed_count
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn progress_percent(&self) -> f32 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        (self.completed_count as f32 / self.chunks.len() as f32) * 100.0
    }

    /// Indices of chunks that have not reached `Done`
    pub fn missing_chunks(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|c| c.status != ChunkStatus::Done)
            .map(|c| c.index)
            .collect()
    }

    /// Planning -> InProgress
    pub fn start(&mut self) -> TransferResult<()> {
        match self.status {
            SessionStatus::Planning => {
                self.status = SessionStatus::InProgress;
                Ok(())
            }
            ref other => Err(TransferError::InvalidState(format!(
                "cannot start session {} in state {:?}",
                self.id, other
            ))),
        }
    }

    fn descriptor_mut(&mut self, index: u32) -> TransferResult<&mut ChunkDescriptor> {
        if self.status != SessionStatus::InProgress {
            return Err(TransferError::InvalidState(format!(
                "session {} is {:?}, chunk {} cannot change",
                self.id, self.status, index
            )));
        }
        let total = self.chunks.len();
        self.chunks.get_mut(index as usize).ok_or_else(|| {
            TransferError::InvalidState(format!("chunk {index} out of range (0..{total})"))
        })
    }

    pub fn assign_location(&mut self, index: u32, location: ChunkLocation) -> TransferResult<()> {
        self.descriptor_mut(index)?.location = Some(location);
        Ok(())
    }

    pub fn mark_in_flight(&mut self, index: u32) -> TransferResult<()> {
        let chunk = self.descriptor_mut(index)?;
        if chunk.status == ChunkStatus::Done {
            return Err(TransferError::InvalidState(format!(
                "chunk {index} already done"
            )));
        }
        chunk.status = ChunkStatus::InFlight;
        Ok(())
    }

    /// Mark chunk `index` done; returns the new completed count. Marking the
    /// same chunk twice does not count twice.
    pub fn mark_done(&mut self, index: u32) -> TransferResult<u32> {
        let chunk = self.descriptor_mut(index)?;
        if chunk.status != ChunkStatus::Done {
            chunk.status = ChunkStatus::Done;
            self.completed_count += 1;
        }
        Ok(self.completed_count)
    }

    pub fn mark_failed(&mut self, index: u32) -> TransferResult<()> {
        let chunk = self.descriptor_mut(index)?;
        if chunk.status != ChunkStatus::Done {
            chunk.status = ChunkStatus::Failed;
        }
        Ok(())
    }

    /// Record byte ranges once chunk sizes are known, in index order.
    pub fn assign_ranges(&mut self, sizes: &[u64]) -> TransferResult<()> {
        if sizes.len() != self.chunks.len() {
            return Err(TransferError::InvalidState(format!(
                "{} sizes for {} chunks",
                sizes.len(),
                self.chunks.len()
            )));
        }
        let mut offset = 0;
        for (chunk, size) in self.chunks.iter_mut().zip(sizes) {
            chunk.byte_range = Some(ByteRange {
                start: offset,
                end: offset + size,
            });
            offset += size;
        }
        self.total_bytes = Some(offset);
        Ok(())
    }

    /// InProgress -> Completed, only once every chunk is done
    pub fn complete(&mut self) -> TransferResult<()> {
        if self.status != SessionStatus::InProgress {
            return Err(TransferError::InvalidState(format!(
                "cannot complete session {} in state {:?}",
                self.id, self.status
            )));
        }
        if self.completed_count != self.total_chunks() {
            return Err(TransferError::InvalidState(format!(
                "session {} has {} of {} chunks done",
                self.id,
                self.completed_count,
                self.total_chunks()
            )));
        }
        self.status = SessionStatus::Completed;
        Ok(())
    }

    /// Move to `Failed` from any non-terminal state
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Failed(reason.into());
        }
    }
}
