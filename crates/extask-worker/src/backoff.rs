//! Linear backoff for failed fetches.

use std::time::Duration;

/// Number of units the delay saturates at.
pub const MAX_BACKOFF_STEPS: u32 = 60;

/// Delay grows by one unit per consecutive failure up to
/// [`MAX_BACKOFF_STEPS`] units and starts over after a success.
#[derive(Debug, Clone)]
pub struct FetchBackoff {
    unit: Duration,
    failures: u32,
}

impl FetchBackoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit, failures: 0 }
    }

    /// Record a failure and return how long to wait before the next fetch.
    pub fn next_delay(&mut self) -> Duration {
        if self.failures < MAX_BACKOFF_STEPS {
            self.failures += 1;
        }
        self.unit * self.failures
    }

    /// Record a success.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Current consecutive failure count (saturated).
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
