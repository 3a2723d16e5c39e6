use portable_atomic::{AtomicU64, Ordering};

/// Running counters shared by the controller, the worker pool and the
/// deposit thread. Updated lock-free from the audio callback.
#[derive(Debug, Default)]
pub struct EngineStats {
    cycles: AtomicU64,
    dispatched: AtomicU64,
    deposited: AtomicU64,
    late_deposits: AtomicU64,
    missed_deadlines: AtomicU64,
    failed_tasks: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub dispatched: u64,
    pub deposited: u64,
    pub late_deposits: u64,
    pub missed_deadlines: u64,
    pub failed_tasks: u64,
}

impl EngineStats {
    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deposit(&self) {
        self.deposited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_late_deposit(&self) {
        self.late_deposits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_missed_deadline(&self) {
        self.missed_deadlines.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_task(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            deposited: self.deposited.load(Ordering::Relaxed),
            late_deposits: self.late_deposits.load(Ordering::Relaxed),
            missed_deadlines: self.missed_deadlines.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
        }
    }
}
