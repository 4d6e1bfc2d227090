//! Coarse exponentially decaying counter for recent-failure tracking.
//!
//! The value decays lazily: no background task, no timer. Every `update` and
//! `get` first applies whatever decay has accrued since the last operation,
//! using a CAS on the `last_decay` timestamp so concurrent readers never
//! double-decay.

use crate::clock::{Clock, SystemClock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Decay is applied in discrete sub-intervals, ten per half-life. Shorter
/// intervals make the decay curve smoother; ten keeps `0.5^(n/10)` cheap while
/// staying well inside the tolerance the selector cares about.
pub const SUB_INTERVALS_PER_HALF_LIFE: u64 = 10;

/// Scalar counter whose value halves every `half_life` of wall time.
#[derive(Debug)]
pub struct DecayingReservoir {
    value: Mutex<f64>,
    last_decay: AtomicU64,
    interval_nanos: u64,
    clock: Arc<dyn Clock>,
}

impl DecayingReservoir {
    pub fn new(half_life: Duration) -> Self {
        Self::with_clock(half_life, Arc::new(SystemClock::default()))
    }

    pub fn with_clock(half_life: Duration, clock: Arc<dyn Clock>) -> Self {
        let interval_nanos = (half_life.as_nanos() as u64 / SUB_INTERVALS_PER_HALF_LIFE).max(1);
        let now = clock.now_nanos();
        Self {
            value: Mutex::new(0.0),
            last_decay: AtomicU64::new(now),
            interval_nanos,
            clock,
        }
    }

    /// Add `weight` to the counter after applying accrued decay.
    pub fn update(&self, weight: f64) {
        self.decay();
        let mut value = self.value.lock().unwrap_or_else(|p| p.into_inner());
        *value += weight;
    }

    /// Current value after applying accrued decay.
    pub fn get(&self) -> f64 {
        self.decay();
        *self.value.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn decay(&self) {
        let now = self.clock.now_nanos();
        let last = self.last_decay.load(Ordering::Acquire);
        if now <= last {
            return;
        }
        let intervals = (now - last) / self.interval_nanos;
        if intervals == 0 {
            return;
        }
        // Advance last_decay by whole intervals only; the remainder keeps
        // accruing toward the next interval. Whoever wins the CAS applies the
        // multiplication, so concurrent callers cannot decay the same window
        // twice.
        let next = last + intervals * self.interval_nanos;
        if self
            .last_decay
            .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let factor = 0.5_f64.powf(intervals as f64 / SUB_INTERVALS_PER_HALF_LIFE as f64);
            let mut value = self.value.lock().unwrap_or_else(|p| p.into_inner());
            *value *= factor;
        }
    }
}
