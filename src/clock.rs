use portable_atomic::{AtomicU64, Ordering};

/// Callback counter shared between the controller and the deposit side.
///
/// Internally a monotonic tick (number of advances so far); the cyclic value
/// seen by the schedule runs `1..=period` and restarts at 1, never 0 once the
/// first callback has run.
#[derive(Debug)]
pub struct CycleClock {
    ticks: AtomicU64,
    period: u64,
}

impl CycleClock {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "clock period must be non-zero");
        Self {
            ticks: AtomicU64::new(0),
            period: period as u64,
        }
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// Advances by one callback and publishes the new tick.
    ///
    /// Only the controller calls this; everything it wrote before the call is
    /// visible to any thread that observes the returned tick.
    pub fn advance(&self) -> u64 {
        let tick = self.ticks.load(Ordering::Relaxed) + 1;
        self.ticks.store(tick, Ordering::Release);
        tick
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Current cyclic value, 0 before the first callback.
    pub fn value(&self) -> u64 {
        self.cyclic(self.ticks())
    }

    pub fn cyclic(&self, tick: u64) -> u64 {
        if tick == 0 {
            0
        } else {
            (tick - 1) % self.period + 1
        }
    }

    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Release);
    }
}

/// Cyclic clock value at which a result dispatched at `dispatch_clock` with
/// `lag` cycles to complete may be deposited.
pub fn deposit_target(dispatch_clock: u64, lag: u64, period: u64) -> u64 {
    debug_assert!(lag >= 1 && lag <= period);
    match (dispatch_clock + lag - 1) % period {
        0 => period,
        target => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_to_one_never_zero() {
        let clock = CycleClock::new(8);
        assert_eq!(clock.value(), 0);
        let values: Vec<u64> = (0..20).map(|_| clock.cyclic(clock.advance())).collect();
        let expected: Vec<u64> = (0..20).map(|i| i % 8 + 1).collect();
        assert_eq!(values, expected);
        assert_eq!(clock.ticks(), 20);
        assert_eq!(clock.value(), 4);
    }

    #[test]
    fn cyclic_target_matches_monotonic_target() {
        let period = 16;
        let clock = CycleClock::new(period as usize);
        for dispatch_tick in 1..200u64 {
            for lag in [1, 2, 4, 8, 16] {
                let monotonic = dispatch_tick + lag - 1;
                assert_eq!(
                    deposit_target(clock.cyclic(dispatch_tick), lag, period),
                    clock.cyclic(monotonic),
                    "dispatch {} lag {}",
                    dispatch_tick,
                    lag
                );
            }
        }
    }

    #[test]
    fn zero_target_maps_to_period() {
        assert_eq!(deposit_target(8, 1, 8), 8);
        assert_eq!(deposit_target(7, 2, 8), 8);
        assert_eq!(deposit_target(8, 2, 8), 1);
        assert_eq!(deposit_target(4, 8, 8), 3);
    }
}
