//! Exponential backoff schedule for the retrier.

use rand::Rng;
use std::time::Duration;

/// Default initial delay between attempts.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Default ceiling on a single delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);
/// Growth factor between consecutive delays.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Each delay is drawn uniformly from `delay * (1 ± randomization)`.
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.15;

/// Exponential backoff with bounded, randomized delays.
///
/// The schedule keeps its own attempt counter so a throttling response can
/// [`reset`](ExponentialBackoff::reset) it without touching the caller's
/// overall attempt budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    randomization: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_INITIAL_BACKOFF,
            DEFAULT_MAX_BACKOFF,
            DEFAULT_BACKOFF_MULTIPLIER,
            DEFAULT_RANDOMIZATION_FACTOR,
        )
    }
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, randomization: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: if multiplier < 1.0 { 1.0 } else { multiplier },
            randomization: randomization.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Draw the next delay and advance the schedule.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with_rng(&mut rand::rng())
    }

    /// Deterministic variant for tests.
    pub fn next_delay_with_rng<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.randomize(delay, rng)
    }

    /// Restart the schedule from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays drawn since construction or the last reset.
    pub fn ticks(&self) -> u32 {
        self.attempt
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(64) as i32);
        let nanos = self.initial.as_secs_f64() * factor;
        let delay = Duration::try_from_secs_f64(nanos).unwrap_or(self.max);
        delay.min(self.max)
    }

    fn randomize<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.randomization == 0.0 || delay.is_zero() {
            return delay;
        }
        let base = delay.as_secs_f64();
        let spread = base * self.randomization;
        let jittered = rng.random_range((base - spread)..=(base + spread));
        Duration::try_from_secs_f64(jittered.max(0.0))
            .unwrap_or(delay)
            .min(self.max)
    }
}
