use crate::Sample;
use std::sync::Arc;

/// Sliding window over the most recent input, kept as a ring.
///
/// Owned by the controller. Workers never see the ring itself, only the
/// snapshot taken for them at dispatch.
#[derive(Clone, Debug)]
pub struct HistoryRing {
    buffer: Vec<Sample>,
    block_size: usize,
    // next write position, always block aligned
    write: usize,
}

impl HistoryRing {
    pub fn new(len: usize, block_size: usize) -> Self {
        assert!(block_size > 0 && len % block_size == 0 && len >= block_size);
        Self {
            buffer: vec![0.0; len],
            block_size,
            write: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops the oldest block and appends `input * gain` as the newest.
    pub fn push_block(&mut self, input: &[Sample], gain: f32) {
        debug_assert_eq!(input.len(), self.block_size);
        let dst = &mut self.buffer[self.write..self.write + self.block_size];
        for (d, s) in dst.iter_mut().zip(input) {
            *d = s * gain;
        }
        self.write = (self.write + self.block_size) % self.buffer.len();
    }

    /// Copies the most recent `dst.len()` samples into `dst`, oldest first.
    pub fn copy_latest(&self, dst: &mut [Sample]) {
        let len = dst.len();
        assert!(len <= self.buffer.len());
        let start = (self.write + self.buffer.len() - len) % self.buffer.len();
        let first = (self.buffer.len() - start).min(len);
        dst[..first].copy_from_slice(&self.buffer[start..start + first]);
        dst[first..].copy_from_slice(&self.buffer[..len - first]);
    }

    pub fn latest(&self, len: usize) -> Arc<[Sample]> {
        let mut snapshot = vec![0.0; len];
        self.copy_latest(&mut snapshot);
        snapshot.into()
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write = 0;
    }
}
