//! Fixed-size sample storage.

use crate::error::{ScanError, ScanResult};

/// One block of samples of a channel.
///
/// A chunk covers the absolute record indices
/// `start_index..start_index + len()` and never grows past its capacity.
#[derive(Debug, Clone)]
pub struct RecordingChunk {
    start_index: u64,
    data: Vec<i32>,
    capacity: usize,
}

impl RecordingChunk {
    /// Empty chunk whose first record has absolute index `start_index`.
    pub fn new(start_index: u64, capacity: usize) -> Self {
        Self {
            start_index,
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record index of the first value.
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing was stored yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether no further value fits.
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Free slots left.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Extend by up to `count` zeroed slots and return them for filling.
    pub fn reserve(&mut self, count: usize) -> ScanResult<&mut [i32]> {
        if self.is_full() {
            return Err(ScanError::ChunkFull);
        }
        let start = self.data.len();
        let take = count.min(self.remaining());
        self.data.resize(start + take, 0);
        Ok(&mut self.data[start..])
    }

    /// Record at absolute index `index`.
    pub fn get(&self, index: u64) -> Option<i32> {
        let local = index.checked_sub(self.start_index)?;
        self.data.get(usize::try_from(local).ok()?).copied()
    }

    /// Stored values, oldest first.
    pub fn values(&self) -> &[i32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_stops_at_capacity() {
        let mut chunk = RecordingChunk::new(0, 4);
        assert_eq!(chunk.reserve(3).unwrap().len(), 3);
        assert_eq!(chunk.reserve(3).unwrap().len(), 1);
        assert!(chunk.is_full());
        assert!(matches!(chunk.reserve(1), Err(ScanError::ChunkFull)));
    }

    #[test]
    fn test_get_uses_local_index() {
        let mut chunk = RecordingChunk::new(100, 4);
        chunk.reserve(2).unwrap().copy_from_slice(&[7, 8]);
        assert_eq!(chunk.get(101), Some(8));
        assert_eq!(chunk.get(99), None);
        assert_eq!(chunk.get(102), None);
    }
}
