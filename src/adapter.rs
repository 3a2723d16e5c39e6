//! Runs a fixed-block [`Convolution`] from device callbacks of any size.

use crate::error::Result;
use crate::{Convolution, Sample};

/// Collects mono input until a full block is available, processes it and
/// hands out the result one device frame at a time.
pub struct BlockAdapter<E: Convolution> {
    engine: E,
    pending: Vec<Sample>,
    output: Vec<Sample>,
    frame: Vec<Sample>,
}

impl<E: Convolution> BlockAdapter<E> {
    pub fn new(engine: E, device_channels: usize) -> Self {
        let block_size = engine.block_size();
        let num_channels = engine.num_channels();
        Self {
            engine,
            pending: Vec::with_capacity(block_size),
            output: vec![0.0; block_size * num_channels],
            frame: vec![0.0; device_channels.max(1)],
        }
    }

    /// Input frames waiting for the block to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feeds `input` and calls `emit` with every output frame produced, laid
    /// out for the device.
    pub fn push<F: FnMut(&[Sample])>(&mut self, input: &[Sample], mut emit: F) -> Result<()> {
        let block_size = self.engine.block_size();
        let num_channels = self.engine.num_channels();
        let mut input = input;

        while !input.is_empty() {
            let take = (block_size - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < block_size {
                break;
            }

            self.engine.process(&self.pending, &mut self.output)?;
            self.pending.clear();

            for frame in self.output.chunks_exact(num_channels) {
                map_channels(frame, &mut self.frame);
                emit(&self.frame);
            }
        }
        Ok(())
    }
}

/// Spreads one engine frame over the device channels. Mono is duplicated,
/// a mono device gets the mix, extra device channels stay silent.
pub fn map_channels(src: &[Sample], dst: &mut [Sample]) {
    match (src.len(), dst.len()) {
        (_, 0) => {}
        (1, _) => dst.fill(src[0]),
        (n, 1) => dst[0] = src.iter().sum::<Sample>() / n as Sample,
        _ => {
            for (i, out) in dst.iter_mut().enumerate() {
                *out = src.get(i).copied().unwrap_or(0.0);
            }
        }
    }
}
