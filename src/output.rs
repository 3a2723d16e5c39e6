use crate::Sample;
use portable_atomic::{AtomicF32, Ordering};

/// Pending output, one atomic ring per channel, addressed by absolute frame.
///
/// Deposits add with `fetch_add`, so overlapping contributions from different
/// threads are summed exactly once. The controller reads and clears a whole
/// block at emission time. Ordering between the two sides comes from the
/// cycle clock: a block is only written after the tick that frees its slot
/// has been published.
pub struct OutputRing {
    channels: Vec<Box<[AtomicF32]>>,
    block_size: usize,
    num_blocks: usize,
}

impl OutputRing {
    pub fn new(num_channels: usize, block_size: usize, num_blocks: usize) -> Self {
        assert!(num_channels > 0 && block_size > 0 && num_blocks > 0);
        let capacity = block_size * num_blocks;
        let channels = (0..num_channels)
            .map(|_| (0..capacity).map(|_| AtomicF32::new(0.0)).collect())
            .collect();
        Self {
            channels,
            block_size,
            num_blocks,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn capacity(&self) -> usize {
        self.block_size * self.num_blocks
    }

    fn slot(&self, frame: u64) -> usize {
        (frame % self.capacity() as u64) as usize
    }

    /// Adds `src` into `channel` starting at absolute frame `start`.
    pub fn accumulate(&self, channel: usize, start: u64, src: &[Sample]) {
        debug_assert!(src.len() <= self.capacity());
        let ring = &self.channels[channel];
        let mut slot = self.slot(start);
        for &sample in src {
            ring[slot].fetch_add(sample, Ordering::Relaxed);
            slot += 1;
            if slot == ring.len() {
                slot = 0;
            }
        }
    }

    /// Moves block `block` into `dst` (interleaved by channel) and zeroes it
    /// so the slot can take deposits for `block + num_blocks`.
    pub fn take_block(&self, block: u64, dst: &mut [Sample]) {
        let num_channels = self.channels.len();
        debug_assert_eq!(dst.len(), self.block_size * num_channels);
        let start = self.slot(block * self.block_size as u64);
        for (channel, ring) in self.channels.iter().enumerate() {
            let cells = &ring[start..start + self.block_size];
            for (frame, cell) in cells.iter().enumerate() {
                dst[frame * num_channels + channel] = cell.swap(0.0, Ordering::Relaxed);
            }
        }
    }

    /// Current content of one frame, for inspection.
    pub fn peek(&self, channel: usize, frame: u64) -> Sample {
        self.channels[channel][self.slot(frame)].load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        for ring in &self.channels {
            for cell in ring.iter() {
                cell.store(0.0, Ordering::Relaxed);
            }
        }
    }
}

impl std::fmt::Debug for OutputRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRing")
            .field("channels", &self.channels.len())
            .field("block_size", &self.block_size)
            .field("num_blocks", &self.num_blocks)
            .finish()
    }
}
