//! Convolution tasks and the compute half of a worker.
//!
//! A worker takes one history snapshot, convolves it with one impulse block
//! (zero-padded to twice the block length so the product is a linear
//! convolution), scales the result by `1/factor` and hands it to the deposit
//! thread, which adds it to the output once the clock reaches the task's
//! target.

use crate::depositor::DepositSender;
use crate::error::Result;
use crate::fft::{ComplexOps, FftBackend};
use crate::impulse::ImpulseTransforms;
use crate::planner::BlockSpec;
use crate::Sample;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Work order created by the controller for one impulse block.
#[derive(Clone, Debug)]
pub struct ConvolutionTask {
    /// History range the snapshot was taken from, inclusive.
    pub first: usize,
    pub last: usize,
    pub block: BlockSpec,
    pub dispatch_tick: u64,
    /// Cyclic clock value at dispatch.
    pub dispatch_clock: u64,
    pub input: Arc<[Sample]>,
}

impl ConvolutionTask {
    /// Monotonic tick after which the result may be deposited.
    pub fn target_tick(&self) -> u64 {
        self.dispatch_tick + self.block.lag as u64 - 1
    }

    /// Output block that receives the first sample of the result.
    pub fn start_block(&self) -> u64 {
        self.target_tick() + 1
    }
}

/// A finished, scaled convolution result waiting for its deposit cycle.
#[derive(Clone, Debug)]
pub struct Contribution {
    pub target_tick: u64,
    pub start_block: u64,
    pub block_index: usize,
    pub channels: Vec<Vec<Sample>>,
}

impl PartialEq for Contribution {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Contribution {}

impl PartialOrd for Contribution {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Contribution {
    fn cmp(&self, other: &Self) -> Ordering {
        self.target_tick
            .cmp(&other.target_tick)
            .then(self.start_block.cmp(&other.start_block))
            .then(self.block_index.cmp(&other.block_index))
    }
}

pub struct ConvolutionWorker<F: FftBackend, C: ComplexOps<Complex = F::Complex>> {
    ffts: Arc<Vec<F>>,
    transforms: Arc<ImpulseTransforms<F::Complex>>,
    _complex_ops: PhantomData<C>,
}

impl<F: FftBackend, C: ComplexOps<Complex = F::Complex>> Clone for ConvolutionWorker<F, C> {
    fn clone(&self) -> Self {
        Self {
            ffts: self.ffts.clone(),
            transforms: self.transforms.clone(),
            _complex_ops: PhantomData,
        }
    }
}

impl<F: FftBackend, C: ComplexOps<Complex = F::Complex>> ConvolutionWorker<F, C> {
    /// `ffts` is indexed by factor position, each of length `2 * factor * B`.
    pub fn new(ffts: Arc<Vec<F>>, transforms: Arc<ImpulseTransforms<F::Complex>>) -> Self {
        Self {
            ffts,
            transforms,
            _complex_ops: PhantomData,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.transforms.num_channels()
    }

    /// Convolves the task's snapshot with its impulse block, one result per
    /// impulse channel, each `2 * block.len` long and divided by the factor.
    pub fn convolve(&self, task: &ConvolutionTask) -> Result<Contribution> {
        let block = task.block;
        let fft = &self.ffts[block.factor_index];
        let conv_len = 2 * block.len;
        debug_assert_eq!(fft.len(), conv_len);
        debug_assert_eq!(task.input.len(), block.len);

        let mut padded = vec![0.0; conv_len];
        C::copy_and_pad(&mut padded, &task.input, block.len);

        let mut scratch = vec![F::Complex::default(); fft.scratch_len()];
        let mut spectrum = vec![F::Complex::default(); fft.complex_len()];
        fft.forward(&mut padded, &mut spectrum, &mut scratch)?;

        let scale = 1.0 / block.factor as f32;
        let mut product = vec![F::Complex::default(); fft.complex_len()];
        let mut time = vec![0.0; conv_len];
        let mut channels = Vec::with_capacity(self.num_channels());

        for channel in 0..self.num_channels() {
            C::complex_multiply(
                &mut product,
                &spectrum,
                self.transforms.get(block.index, channel),
            );
            fft.inverse(&mut product, &mut time, &mut scratch)?;

            let mut result = vec![0.0; conv_len];
            C::scale_into(&mut result, &time, scale);
            channels.push(result);
        }

        Ok(Contribution {
            target_tick: task.target_tick(),
            start_block: task.start_block(),
            block_index: block.index,
            channels,
        })
    }

    /// Fire-and-forget entry point used on the worker pool.
    pub fn run(&self, task: ConvolutionTask, sink: &DepositSender) {
        debug!(
            "h{}: convolving history [{}, {}], deposit at tick {}",
            task.block.index,
            task.first,
            task.last,
            task.target_tick()
        );
        match self.convolve(&task) {
            Ok(contribution) => sink.submit(contribution),
            Err(err) => {
                warn!("h{} failed at tick {}: {}", task.block.index, task.dispatch_tick, err);
                sink.abandon(task.start_block());
            }
        }
    }
}
