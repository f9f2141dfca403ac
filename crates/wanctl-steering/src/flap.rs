//! Flap detection and threshold penalty.
//!
//! Every FSM transition lands in a sliding window. Too many transitions
//! in the window means the line is oscillating around the thresholds —
//! the brake raises the steer threshold for a penalty period so only
//! clearly-degraded conditions steer until things settle.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Flap brake configuration.
#[derive(Debug, Clone, Copy)]
pub struct FlapConfig {
    /// Window over which transitions are counted.
    pub window: Duration,
    /// Transitions allowed inside the window before penalizing.
    pub max_toggles: usize,
    /// Added to the steer threshold while penalized.
    pub penalty_threshold_add: u8,
    /// How long the penalty lasts.
    pub penalty_duration: Duration,
}

impl Default for FlapConfig {
    fn default() -> Self {
        FlapConfig {
            window: Duration::from_secs(10 * 60),
            max_toggles: 3,
            penalty_threshold_add: 15,
            penalty_duration: Duration::from_secs(300),
        }
    }
}

/// Sliding-window transition counter with penalty state.
#[derive(Debug)]
pub struct FlapDetector {
    config: FlapConfig,
    events: VecDeque<Instant>,
    penalty_until: Option<Instant>,
}

impl FlapDetector {
    pub fn new(config: FlapConfig) -> FlapDetector {
        FlapDetector {
            config,
            events: VecDeque::new(),
            penalty_until: None,
        }
    }

    /// Record an FSM transition; may start a penalty.
    pub fn record_transition(&mut self) {
        self.record_transition_at(Instant::now());
    }

    pub fn record_transition_at(&mut self, now: Instant) {
        self.events.push_back(now);
        self.evict(now);

        if self.events.len() > self.config.max_toggles && self.penalty_until.is_none() {
            self.penalty_until = Some(now + self.config.penalty_duration);
            tracing::warn!(
                toggles = self.events.len(),
                window_s = self.config.window.as_secs(),
                penalty_add = self.config.penalty_threshold_add,
                penalty_s = self.config.penalty_duration.as_secs(),
                "flapping detected, raising steer threshold"
            );
        }
    }

    /// Extra points added to the steer threshold right now.
    pub fn threshold_adjustment(&mut self) -> u8 {
        self.threshold_adjustment_at(Instant::now())
    }

    pub fn threshold_adjustment_at(&mut self, now: Instant) -> u8 {
        if let Some(until) = self.penalty_until {
            if now < until {
                return self.config.penalty_threshold_add;
            }
            tracing::info!("flap penalty expired, thresholds restored");
            self.penalty_until = None;
        }
        0
    }

    pub fn is_penalized_at(&self, now: Instant) -> bool {
        self.penalty_until.is_some_and(|until| now < until)
    }

    /// Transitions currently inside the window.
    pub fn toggles_in_window_at(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.events.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.events.front() {
            if now.saturating_duration_since(*front) > self.config.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}
