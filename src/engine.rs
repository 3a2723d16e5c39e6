//! The engine context and its per-callback controller.
//!
//! Each callback runs five steps in order:
//!
//! 1. emit the output block that is due (reading and clearing it),
//! 2. advance the cycle clock,
//! 3. append the new input to the history,
//! 4. dispatch two workers for every factor whose turn it is,
//! 5. retire the emitted block.
//!
//! The callback never blocks under [`DeadlinePolicy::RealTime`]. All timing
//! between the controller and the workers goes through the cycle clock.

use crate::clock::{deposit_target, CycleClock};
use crate::config::{DeadlinePolicy, EngineConfig};
use crate::depositor::{DeadlineLedger, DepositSender, Depositor};
use crate::error::{ConvolutionError, Result};
use crate::fft::{ComplexOps, Fft, FftBackend, RustComplexOps};
use crate::history::HistoryRing;
use crate::impulse::{ImpulseResponse, ImpulseTransforms};
use crate::output::OutputRing;
use crate::planner::PartitionPlan;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::worker::{ConvolutionTask, ConvolutionWorker};
use crate::{Convolution, Sample};
use crossbeam::utils::Backoff;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct GenericConvolutionEngine<F: FftBackend, C: ComplexOps<Complex = F::Complex>> {
    config: EngineConfig,
    plan: PartitionPlan,
    num_channels: usize,
    input_gain: f32,
    history: HistoryRing,
    clock: Arc<CycleClock>,
    output: Arc<OutputRing>,
    ledger: Arc<DeadlineLedger>,
    stats: Arc<EngineStats>,
    worker: ConvolutionWorker<F, C>,
    sink: DepositSender,
    // last block handed to the transport
    played: u64,
    pool: rayon::ThreadPool,
    depositor: Depositor,
}

pub type ConvolutionEngine = GenericConvolutionEngine<Fft, RustComplexOps>;

impl<F: FftBackend, C: ComplexOps<Complex = F::Complex>> GenericConvolutionEngine<F, C> {
    /// Plans the partitions for `impulse` and starts the worker pool and the
    /// deposit thread.
    pub fn new(impulse: &ImpulseResponse, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let plan = PartitionPlan::for_frames(impulse.num_frames(), config.min_block_size)?;
        Self::with_plan(impulse, plan, config)
    }

    pub fn with_plan(
        impulse: &ImpulseResponse,
        plan: PartitionPlan,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if plan.min_block() != config.min_block_size {
            return Err(ConvolutionError::InvalidConfig(format!(
                "plan block size {} differs from configured block size {}",
                plan.min_block(),
                config.min_block_size
            )));
        }
        if impulse.sample_rate() != config.sample_rate {
            return Err(ConvolutionError::SampleRateMismatch {
                impulse: impulse.sample_rate(),
                engine: config.sample_rate,
            });
        }
        if impulse.num_frames() > plan.covered_len() {
            warn!(
                "impulse has {} frames, only the first {} are convolved",
                impulse.num_frames(),
                plan.covered_len()
            );
        }

        let block_size = plan.min_block();
        let ffts: Vec<F> = plan
            .factors()
            .iter()
            .map(|&factor| F::new(2 * factor * block_size))
            .collect();
        let padded = impulse.padded(plan.impulse_len());
        let transforms = ImpulseTransforms::build::<F, C>(&padded, &plan, &ffts)?;
        let worker = ConvolutionWorker::new(Arc::new(ffts), Arc::new(transforms));

        let num_channels = impulse.num_channels();
        let clock = Arc::new(CycleClock::new(plan.period()));
        let output = Arc::new(OutputRing::new(
            num_channels,
            block_size,
            plan.output_len() / block_size,
        ));
        let ledger = Arc::new(DeadlineLedger::new(2 * plan.period() + 1));
        let stats = Arc::new(EngineStats::default());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("reverb-worker-{}", i))
            .build()?;
        let (depositor, sink) = Depositor::spawn(
            clock.clone(),
            output.clone(),
            ledger.clone(),
            stats.clone(),
            config.poll_interval(),
        )?;

        info!(
            "convolution engine: impulse {} frames ({} padded), {} channel(s), block {}, factors {:?}, period {}, latency {} frames",
            impulse.num_frames(),
            plan.impulse_len(),
            num_channels,
            block_size,
            plan.factors(),
            plan.period(),
            plan.latency_frames()
        );

        Ok(Self {
            input_gain: config.effective_input_gain(),
            history: HistoryRing::new(plan.history_len(), block_size),
            config,
            plan,
            num_channels,
            clock,
            output,
            ledger,
            stats,
            worker,
            sink,
            played: 0,
            pool,
            depositor,
        })
    }

    pub fn plan(&self) -> &PartitionPlan {
        &self.plan
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn latency_frames(&self) -> usize {
        self.plan.latency_frames()
    }

    /// Cyclic clock value after the last callback.
    pub fn clock_value(&self) -> u64 {
        self.clock.value()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Results dispatched but not yet deposited, including those waiting for
    /// a later tick.
    pub fn in_flight(&self) -> usize {
        self.ledger.total_outstanding()
    }

    /// Blocks until no worker is computing any more, or `timeout` passes.
    /// Finished results may still be queued for a later tick. Returns whether
    /// the workers went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        while self.ledger.running() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            if backoff.is_completed() {
                std::thread::sleep(self.config.poll_interval());
            } else {
                backoff.snooze();
            }
        }
        true
    }

    fn run_cycle(&mut self, input: &[Sample], output: &mut [Sample]) {
        let block = self.played + 1;

        // 1. emit
        self.await_block(block);
        self.output.take_block(block, output);

        // 2. advance
        let tick = self.clock.advance();
        let clock = self.clock.cyclic(tick);
        debug_assert_eq!(tick, block);
        debug_assert!((1..=self.clock.period()).contains(&clock));

        // 3. history
        self.history.push_block(input, self.input_gain);

        // 4. dispatch
        self.dispatch(tick, clock);

        // 5. retire
        self.played = block;
        self.stats.record_cycle();
    }

    fn await_block(&self, block: u64) {
        if self.ledger.outstanding(block) == 0 {
            return;
        }
        match self.config.deadline {
            DeadlinePolicy::RealTime => self.stats.record_missed_deadline(),
            DeadlinePolicy::Wait => {
                let backoff = Backoff::new();
                while self.ledger.outstanding(block) > 0 {
                    if backoff.is_completed() {
                        std::thread::sleep(Duration::from_micros(20));
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }
    }

    fn dispatch(&self, tick: u64, clock: u64) {
        let block_size = self.plan.min_block();
        let last = self.history.len() - 1;

        for (factor_index, &factor) in self.plan.factors().iter().enumerate() {
            if clock == 0 || clock % factor as u64 != 0 {
                continue;
            }

            let len = factor * block_size;
            let input = self.history.latest(len);

            for &block in self.plan.blocks_for(factor_index) {
                let task = ConvolutionTask {
                    first: last + 1 - len,
                    last,
                    block,
                    dispatch_tick: tick,
                    dispatch_clock: clock,
                    input: input.clone(),
                };
                debug_assert_eq!(
                    self.clock.cyclic(task.target_tick()),
                    deposit_target(clock, block.lag as u64, self.clock.period())
                );

                self.ledger.reserve(task.start_block());
                self.stats.record_dispatch();

                let worker = self.worker.clone();
                let sink = self.sink.clone();
                self.pool.spawn(move || worker.run(task, &sink));
            }
        }
    }

    /// Emptied output, history and clock, as if freshly built. Waits for the
    /// workers and discards their queued results so none of them lands after
    /// the reset. Returns false if that did not finish within `timeout`.
    pub fn reset(&mut self, timeout: Duration) -> bool {
        let started = Instant::now();
        let idle = self.wait_idle(timeout)
            && self
                .depositor
                .flush(timeout.saturating_sub(started.elapsed()));
        if !idle {
            warn!("reset timed out with {} results in flight", self.in_flight());
        }
        self.history.clear();
        self.output.clear();
        self.clock.reset();
        self.played = 0;
        idle
    }
}

impl<F: FftBackend, C: ComplexOps<Complex = F::Complex>> Convolution
    for GenericConvolutionEngine<F, C>
{
    fn block_size(&self) -> usize {
        self.plan.min_block()
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn process(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        let block_size = self.plan.min_block();
        if input.len() != block_size {
            return Err(ConvolutionError::BlockLength {
                expected: block_size,
                actual: input.len(),
            });
        }
        if output.len() != block_size * self.num_channels {
            return Err(ConvolutionError::BlockLength {
                expected: block_size * self.num_channels,
                actual: output.len(),
            });
        }
        self.run_cycle(input, output);
        Ok(())
    }
}
