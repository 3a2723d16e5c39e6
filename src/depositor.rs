//! The synchronized deposit half of every worker.
//!
//! Workers finish on the pool and send their scaled results here. A single
//! thread keeps them ordered by target tick, watches the cycle clock with a
//! spin-then-sleep backoff and adds each result into the output ring once the
//! clock reaches its target. The deadline ledger lets the controller see how
//! many results for a given output block are still on their way.

use crate::clock::CycleClock;
use crate::output::OutputRing;
use crate::stats::EngineStats;
use crate::worker::Contribution;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use crossbeam::utils::Backoff;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outstanding results per output block, in a small ring of counters, plus
/// the number of tasks still being computed.
#[derive(Debug)]
pub struct DeadlineLedger {
    slots: Box<[AtomicUsize]>,
    running: AtomicUsize,
}

impl DeadlineLedger {
    /// `horizon` must exceed the largest distance between a dispatch tick and
    /// the block it lands in.
    pub fn new(horizon: usize) -> Self {
        Self {
            slots: (0..horizon.max(1)).map(|_| AtomicUsize::new(0)).collect(),
            running: AtomicUsize::new(0),
        }
    }

    fn slot(&self, block: u64) -> &AtomicUsize {
        &self.slots[(block % self.slots.len() as u64) as usize]
    }

    pub fn reserve(&self, block: u64) {
        self.running.fetch_add(1, Ordering::Relaxed);
        self.slot(block).fetch_add(1, Ordering::Relaxed);
    }

    /// The task's result has been handed over (or given up on).
    fn finish(&self) {
        let previous = self.running.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0);
    }

    /// Tasks dispatched whose result has not reached the deposit thread yet.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn release(&self, block: u64) {
        let previous = self.slot(block).fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "released block {} with nothing reserved", block);
    }

    pub fn outstanding(&self, block: u64) -> usize {
        self.slot(block).load(Ordering::Acquire)
    }

    pub fn total_outstanding(&self) -> usize {
        self.slots.iter().map(|s| s.load(Ordering::Acquire)).sum()
    }
}

/// Handle the worker pool uses to hand results over.
#[derive(Clone)]
pub struct DepositSender {
    tx: Sender<Contribution>,
    ledger: Arc<DeadlineLedger>,
    stats: Arc<EngineStats>,
}

impl DepositSender {
    pub fn submit(&self, contribution: Contribution) {
        let start_block = contribution.start_block;
        if self.tx.send(contribution).is_err() {
            debug!("deposit thread gone, dropping result for block {}", start_block);
            self.ledger.release(start_block);
        }
        self.ledger.finish();
    }

    /// Gives up on a result that will never arrive.
    pub fn abandon(&self, start_block: u64) {
        self.stats.record_failed_task();
        self.ledger.release(start_block);
        self.ledger.finish();
    }
}

pub struct Depositor {
    stop: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct DepositState {
    rx: Receiver<Contribution>,
    clock: Arc<CycleClock>,
    output: Arc<OutputRing>,
    ledger: Arc<DeadlineLedger>,
    stats: Arc<EngineStats>,
    stop: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Depositor {
    pub fn spawn(
        clock: Arc<CycleClock>,
        output: Arc<OutputRing>,
        ledger: Arc<DeadlineLedger>,
        stats: Arc<EngineStats>,
        poll_interval: Duration,
    ) -> std::io::Result<(Self, DepositSender)> {
        let (tx, rx) = unbounded::<Contribution>();
        let stop = Arc::new(AtomicBool::new(false));
        let flush = Arc::new(AtomicBool::new(false));

        let state = DepositState {
            rx,
            clock,
            output,
            ledger: ledger.clone(),
            stats: stats.clone(),
            stop: stop.clone(),
            flush: flush.clone(),
            poll_interval,
        };

        let handle = thread::Builder::new()
            .name("reverb-deposit".into())
            .spawn(move || {
                info!("deposit thread started");
                state.run();
                info!("deposit thread stopped");
            })?;

        Ok((
            Self {
                stop,
                flush,
                handle: Some(handle),
            },
            DepositSender { tx, ledger, stats },
        ))
    }

    /// Drops every queued result and releases it from the ledger. Results
    /// still being computed are not affected. Returns false if the deposit
    /// thread did not get to it within `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.flush.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        while self.flush.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(50));
        }
        true
    }
}

impl Drop for Depositor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl DepositState {
    fn run(self) {
        let mut queue: BinaryHeap<Reverse<Contribution>> = BinaryHeap::new();
        let backoff = Backoff::new();
        let mut disconnected = false;

        while !self.stop.load(Ordering::Acquire) {
            if self.flush.load(Ordering::Acquire) {
                while let Ok(contribution) = self.rx.try_recv() {
                    queue.push(Reverse(contribution));
                }
                debug!("flushing {} queued results", queue.len());
                for Reverse(contribution) in queue.drain() {
                    self.ledger.release(contribution.start_block);
                }
                self.flush.store(false, Ordering::Release);
            }

            let mut progressed = false;

            loop {
                match self.rx.try_recv() {
                    Ok(contribution) => {
                        queue.push(Reverse(contribution));
                        progressed = true;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            let now = self.clock.ticks();
            while queue
                .peek()
                .is_some_and(|Reverse(next)| next.target_tick <= now)
            {
                if let Some(Reverse(contribution)) = queue.pop() {
                    self.deposit(&contribution, now);
                    progressed = true;
                }
            }

            if disconnected && queue.is_empty() {
                break;
            }

            if progressed {
                backoff.reset();
            } else if !backoff.is_completed() {
                backoff.snooze();
            } else if disconnected {
                thread::sleep(self.poll_interval);
            } else {
                match self.rx.recv_timeout(self.poll_interval) {
                    Ok(contribution) => {
                        queue.push(Reverse(contribution));
                        backoff.reset();
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => disconnected = true,
                }
            }
        }
    }

    fn deposit(&self, contribution: &Contribution, now: u64) {
        let block_size = self.output.block_size() as u64;
        let len = contribution.channels.first().map_or(0, Vec::len) as u64;
        let end_block = contribution.start_block + len.div_ceil(block_size);
        debug_assert!(
            end_block <= now + self.output.num_blocks() as u64 + 1,
            "h{} would overrun the output window",
            contribution.block_index
        );

        // blocks up to `now` have already been played
        let skip = if contribution.start_block <= now {
            ((now + 1 - contribution.start_block) * block_size).min(len)
        } else {
            0
        };
        if skip > 0 {
            self.stats.record_late_deposit();
            warn!(
                "h{} missed its deadline by {} cycles, dropping {} frames",
                contribution.block_index,
                now + 1 - contribution.start_block,
                skip
            );
        }

        let start_frame = contribution.start_block * block_size + skip;
        for (channel, samples) in contribution.channels.iter().enumerate() {
            self.output
                .accumulate(channel, start_frame, &samples[skip as usize..]);
        }

        self.stats.record_deposit();
        self.ledger.release(contribution.start_block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(target_tick: u64, value: f32, len: usize) -> Contribution {
        Contribution {
            target_tick,
            start_block: target_tick + 1,
            block_index: 1,
            channels: vec![vec![value; len]],
        }
    }

    fn wait_for(ledger: &DeadlineLedger) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ledger.total_outstanding() > 0 {
            assert!(std::time::Instant::now() < deadline, "deposit never happened");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn holds_results_until_their_target_tick() {
        let clock = Arc::new(CycleClock::new(8));
        let output = Arc::new(OutputRing::new(1, 4, 8));
        let ledger = Arc::new(DeadlineLedger::new(16));
        let stats = Arc::new(EngineStats::default());
        let (depositor, sender) = Depositor::spawn(
            clock.clone(),
            output.clone(),
            ledger.clone(),
            stats.clone(),
            Duration::from_micros(100),
        )
        .unwrap();

        clock.advance();
        ledger.reserve(3);
        sender.submit(contribution(2, 1.0, 8));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(ledger.outstanding(3), 1);
        assert_eq!(output.peek(0, 12), 0.0);

        clock.advance();
        wait_for(&ledger);
        for frame in 12..20 {
            assert_eq!(output.peek(0, frame), 1.0);
        }
        assert_eq!(stats.snapshot().deposited, 1);
        assert_eq!(stats.snapshot().late_deposits, 0);
        drop(depositor);
    }

    #[test]
    fn late_results_skip_played_blocks() {
        let clock = Arc::new(CycleClock::new(8));
        let output = Arc::new(OutputRing::new(1, 4, 8));
        let ledger = Arc::new(DeadlineLedger::new(16));
        let stats = Arc::new(EngineStats::default());
        let (_depositor, sender) = Depositor::spawn(
            clock.clone(),
            output.clone(),
            ledger.clone(),
            stats.clone(),
            Duration::from_micros(100),
        )
        .unwrap();

        for _ in 0..3 {
            clock.advance();
        }
        // targets tick 1, so blocks 2 and 3 are already gone
        ledger.reserve(2);
        sender.submit(contribution(1, 2.0, 16));
        wait_for(&ledger);

        for frame in 8..16 {
            assert_eq!(output.peek(0, frame), 0.0);
        }
        for frame in 16..24 {
            assert_eq!(output.peek(0, frame), 2.0);
        }
        assert_eq!(stats.snapshot().late_deposits, 1);
    }

    #[test]
    fn flush_drops_queued_results() {
        let clock = Arc::new(CycleClock::new(8));
        let output = Arc::new(OutputRing::new(1, 4, 8));
        let ledger = Arc::new(DeadlineLedger::new(16));
        let stats = Arc::new(EngineStats::default());
        let (depositor, sender) = Depositor::spawn(
            clock.clone(),
            output.clone(),
            ledger.clone(),
            stats.clone(),
            Duration::from_micros(100),
        )
        .unwrap();

        ledger.reserve(4);
        ledger.reserve(6);
        sender.submit(contribution(3, 1.0, 4));
        sender.submit(contribution(5, 1.0, 4));
        assert_eq!(ledger.running(), 0);
        assert_eq!(ledger.total_outstanding(), 2);

        assert!(depositor.flush(Duration::from_secs(5)));
        assert_eq!(ledger.total_outstanding(), 0);

        for _ in 0..6 {
            clock.advance();
        }
        thread::sleep(Duration::from_millis(20));
        for frame in 16..28 {
            assert_eq!(output.peek(0, frame), 0.0);
        }
        assert_eq!(stats.snapshot().deposited, 0);
    }

    #[test]
    fn abandoned_results_clear_the_ledger() {
        let ledger = Arc::new(DeadlineLedger::new(4));
        let stats = Arc::new(EngineStats::default());
        let (tx, _rx) = unbounded();
        let sender = DepositSender {
            tx,
            ledger: ledger.clone(),
            stats: stats.clone(),
        };
        ledger.reserve(5);
        assert_eq!(ledger.outstanding(1), 1);
        assert_eq!(ledger.running(), 1);
        sender.abandon(5);
        assert_eq!(ledger.outstanding(5), 0);
        assert_eq!(ledger.running(), 0);
        assert_eq!(stats.snapshot().failed_tasks, 1);
    }
}
