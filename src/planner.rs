//! Partition planning for the non-uniform scheme.
//!
//! An impulse of `L` frames with minimum block `B` is cut into blocks of
//! `B, B, 2B, 2B, 4B, 4B, ..., F_max·B, F_max·B` where `F_max = L / (4B)`.
//! Every doubling factor owns two consecutive blocks: the first completes
//! `f` cycles after dispatch, the second `2f` cycles after dispatch.

use crate::error::{ConvolutionError, Result};

/// One entry of the partition schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSpec {
    /// 1-based impulse-block index, consecutive in schedule order.
    pub index: usize,
    /// Position of the owning factor in the schedule, 0-based.
    pub factor_index: usize,
    pub factor: usize,
    /// Length in frames (`factor * B`).
    pub len: usize,
    /// First impulse frame covered by this block.
    pub offset: usize,
    /// Cycles between dispatch and the cycle whose output carries the result.
    pub lag: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    min_block: usize,
    impulse_len: usize,
    num_blocks: usize,
    max_factor: usize,
    factors: Vec<usize>,
    blocks: Vec<BlockSpec>,
}

impl PartitionPlan {
    pub fn new(impulse_len: usize, min_block: usize) -> Result<Self> {
        if min_block == 0 || !min_block.is_power_of_two() {
            return Err(ConvolutionError::InvalidBlockSize(min_block));
        }
        if !impulse_len.is_power_of_two() {
            return Err(ConvolutionError::ImpulseNotPowerOfTwo(impulse_len));
        }
        if impulse_len % min_block != 0 {
            return Err(ConvolutionError::NotAMultiple {
                impulse_len,
                block_size: min_block,
            });
        }

        let num_blocks = impulse_len / min_block;
        let max_factor = num_blocks / 4;
        if max_factor < 1 {
            return Err(ConvolutionError::NoPartitions {
                impulse_len,
                block_size: min_block,
            });
        }

        let mut factors = Vec::new();
        let mut factor = 1;
        while factor <= max_factor {
            factors.push(factor);
            factor *= 2;
        }

        let mut blocks = Vec::with_capacity(factors.len() * 2);
        let mut offset = 0;
        for (factor_index, &factor) in factors.iter().enumerate() {
            let len = factor * min_block;
            for (entry, lag) in [factor, 2 * factor].into_iter().enumerate() {
                blocks.push(BlockSpec {
                    index: 2 * factor_index + entry + 1,
                    factor_index,
                    factor,
                    len,
                    offset,
                    lag,
                });
                offset += len;
            }
        }

        Ok(Self {
            min_block,
            impulse_len,
            num_blocks,
            max_factor,
            factors,
            blocks,
        })
    }

    /// The smallest plan whose covered span holds `frames` impulse frames.
    pub fn for_frames(frames: usize, min_block: usize) -> Result<Self> {
        Self::new(Self::padded_len(frames, min_block), min_block)
    }

    /// Power-of-two impulse length that keeps `frames` inside the covered span.
    pub fn padded_len(frames: usize, min_block: usize) -> usize {
        (frames + 2 * min_block)
            .max(4 * min_block)
            .next_power_of_two()
    }

    pub fn min_block(&self) -> usize {
        self.min_block
    }

    pub fn impulse_len(&self) -> usize {
        self.impulse_len
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn max_factor(&self) -> usize {
        self.max_factor
    }

    pub fn factors(&self) -> &[usize] {
        &self.factors
    }

    pub fn blocks(&self) -> &[BlockSpec] {
        &self.blocks
    }

    /// Block spec by 1-based index.
    pub fn block(&self, index: usize) -> Option<&BlockSpec> {
        index.checked_sub(1).and_then(|i| self.blocks.get(i))
    }

    /// The two blocks dispatched together for the factor at `factor_index`.
    pub fn blocks_for(&self, factor_index: usize) -> &[BlockSpec] {
        &self.blocks[2 * factor_index..2 * factor_index + 2]
    }

    /// Cycle clock period.
    pub fn period(&self) -> usize {
        2 * self.max_factor
    }

    pub fn history_len(&self) -> usize {
        self.impulse_len / 4
    }

    pub fn output_len(&self) -> usize {
        2 * self.history_len()
    }

    /// Impulse frames reached by the schedule.
    pub fn covered_len(&self) -> usize {
        self.impulse_len - 2 * self.min_block
    }

    /// Frames between an input sample entering and its dry tap leaving.
    pub fn latency_frames(&self) -> usize {
        self.min_block
    }
}
