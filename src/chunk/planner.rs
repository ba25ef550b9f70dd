use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::{PlanningError, PlanningResult};
use super::types::ChunkPlan;

pub const MIB: u64 = 1024 * 1024;

/// Bounds applied when choosing a chunk size
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerLimits {
    /// Files strictly below this size use `default_chunk_size`
    pub small_file_threshold: u64,
    pub default_chunk_size: u64,
    /// Upper bound on any chunk, requested or computed
    pub max_chunk_size: u64,
    /// Larger files are cut into roughly this many chunks
    pub target_chunk_count: u64,
}

impl Default for PlannerLimits {
    fn default() -> Self {
        Self {
            small_file_threshold: 5 * MIB,
            default_chunk_size: MIB,
            max_chunk_size: 5 * MIB,
            target_chunk_count: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkPlanner {
    limits: PlannerLimits,
}

impl ChunkPlanner {
    pub fn new(limits: PlannerLimits) -> PlanningResult<Self> {
        if limits.default_chunk_size == 0 || limits.max_chunk_size == 0 {
            return Err(PlanningError::InvalidChunkSize(
                "chunk size limits must be positive".into(),
            ));
        }
        if limits.default_chunk_size > limits.max_chunk_size {
            return Err(PlanningError::InvalidChunkSize(format!(
                "default chunk size {} exceeds maximum {}",
                limits.default_chunk_size, limits.max_chunk_size
            )));
        }
        if limits.target_chunk_count == 0 {
            return Err(PlanningError::InvalidChunkSize(
                "target chunk count must be positive".into(),
            ));
        }
        Ok(Self { limits })
    }

    pub fn limits(&self) -> &PlannerLimits {
        &self.limits
    }

    /// Compute chunk size and count for a file of `file_size` bytes.
    pub fn plan(&self, file_size: u64, requested_chunk_size: Option<u64>) -> PlanningResult<ChunkPlan> {
        if file_size == 0 {
            return Err(PlanningError::EmptyFile);
        }

        let chunk_size = match requested_chunk_size {
            Some(0) => {
                return Err(PlanningError::InvalidChunkSize(
                    "requested chunk size must be positive".into(),
                ))
            }
            Some(requested) => requested.min(self.limits.max_chunk_size),
            None if file_size < self.limits.small_file_threshold => {
                self.limits.default_chunk_size.min(file_size)
            }
            None => file_size
                .div_ceil(self.limits.target_chunk_count)
                .min(self.limits.max_chunk_size),
        };

        let chunks = file_size.div_ceil(chunk_size);
        let chunk_count = u32::try_from(chunks)
            .map_err(|_| PlanningError::TooManyChunks { file_size, chunks })?;

        Ok(ChunkPlan {
            file_size,
            chunk_size,
            chunk_count,
        })
    }

    /// Cut `data` into per-chunk slices following `plan`. Slices share the
    /// underlying buffer.
    pub fn split(plan: &ChunkPlan, data: &Bytes) -> PlanningResult<Vec<Bytes>> {
        if data.len() as u64 != plan.file_size {
            return Err(PlanningError::InvalidChunkSize(format!(
                "plan covers {} bytes but data has {}",
                plan.file_size,
                data.len()
            )));
        }

        Ok(plan
            .ranges()
            .map(|r| data.slice(r.start as usize..r.end as usize))
            .collect())
    }
}
