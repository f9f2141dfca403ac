//! Sliding-window rate limiter for router config changes.
//!
//! Protects the router from write storms during instability. Monotonic
//! time only — a wall-clock step must never open or close the window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window of change timestamps.
#[derive(Debug)]
pub struct RateLimiter {
    max_changes: usize,
    window: Duration,
    change_times: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_changes: usize, window: Duration) -> RateLimiter {
        RateLimiter {
            max_changes: max_changes.max(1),
            window,
            change_times: VecDeque::with_capacity(max_changes.max(1)),
        }
    }

    /// Whether a change is allowed right now.
    pub fn can_change(&mut self) -> bool {
        self.can_change_at(Instant::now())
    }

    /// Record that a change was applied.
    pub fn record_change(&mut self) {
        self.record_change_at(Instant::now());
    }

    /// Changes still allowed in the current window.
    pub fn changes_remaining(&mut self) -> usize {
        self.changes_remaining_at(Instant::now())
    }

    /// Seconds until a slot frees up; zero when available now.
    pub fn time_until_available(&mut self) -> Duration {
        self.time_until_available_at(Instant::now())
    }

    // The `_at` variants take an explicit clock so behavior is testable
    // without sleeping through real windows.

    pub fn can_change_at(&mut self, now: Instant) -> bool {
        self.evict(now);
        self.change_times.len() < self.max_changes
    }

    pub fn record_change_at(&mut self, now: Instant) {
        self.change_times.push_back(now);
        if self.change_times.len() > self.max_changes {
            self.change_times.pop_front();
        }
    }

    pub fn changes_remaining_at(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.max_changes - self.change_times.len()
    }

    pub fn time_until_available_at(&mut self, now: Instant) -> Duration {
        if self.can_change_at(now) {
            return Duration::ZERO;
        }
        match self.change_times.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.change_times.front() {
            if now.saturating_duration_since(*front) > self.window {
                self.change_times.pop_front();
            } else {
                break;
            }
        }
    }
}
