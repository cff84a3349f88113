//! Minimum-interval write throttling.
//!
//! A `Throttle` lets one event through per interval. Time is always passed in
//! explicitly (`*_at(now)`) so controllers stay deterministic under test.

#[cfg(test)]
#[path = "throttle_test.rs"]
mod throttle_test;

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether an event at `now` would pass.
    #[must_use]
    pub fn ready_at(&self, now: Instant) -> bool {
        self.last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    pub fn record_at(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Check and record in one step. Returns true if the event passes.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        if !self.ready_at(now) {
            return false;
        }
        self.record_at(now);
        true
    }

    /// Forget the last event so the next one passes immediately.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
