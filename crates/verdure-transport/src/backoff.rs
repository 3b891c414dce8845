//! Exponential reconnect backoff.

use std::time::Duration;

/// Exponential backoff: doubles on each failure, capped, reset on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff ramping from `initial` to `max`.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The reconnect schedule used by both transports (250 ms → 8 s).
    #[must_use]
    pub const fn reconnect() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(8))
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Reset to the initial delay after a successful handshake.
    pub const fn reset(&mut self) {
        self.current = self.initial;
    }
}
