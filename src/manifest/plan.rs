use std::ops::Range;

/// The fixed partition of an entry of `length` bytes into `chunk_size` ranges.
///
/// An empty entry still has one (empty) chunk. A zero chunk size is treated as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    length: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(length: u64, chunk_size: u64) -> Self {
        Self {
            length,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u64 {
        if self.length == 0 {
            return 1;
        }
        self.length.div_ceil(self.chunk_size)
    }

    /// The byte range of chunk `index`, or `None` past the last chunk.
    pub fn range(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.length);
        Some(start..end)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        (0..self.chunk_count()).filter_map(|i| self.range(i))
    }
}
