use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` within the source file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// How a file of `file_size` bytes is cut into chunks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPlan {
    pub file_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
}

impl ChunkPlan {
    /// Byte range covered by chunk `index`; the last chunk is truncated at `file_size`.
    pub fn byte_range(&self, index: u32) -> Option<ByteRange> {
        if index >= self.chunk_count {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        let end = std::cmp::min(start + self.chunk_size, self.file_size);
        Some(ByteRange { start, end })
    }

    pub fn ranges(&self) -> impl Iterator<Item = ByteRange> + '_ {
        (0..self.chunk_count).filter_map(move |i| self.byte_range(i))
    }
}
