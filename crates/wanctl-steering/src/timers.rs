//! Steering timers.
//!
//! Three timers gate the FSM: degrade (sustain before steering),
//! hold-down (minimum time steered), recovery (sustain before
//! draining). Timers count wall seconds and are decremented once per
//! cycle by the configured `cycle_interval` — never by a constant, so
//! a 0.05 s inner loop and a 2 s loop expire after the same elapsed
//! time.

/// Configured durations, seconds.
#[derive(Debug, Clone, Copy)]
pub struct TimerDurations {
    pub sustain_s: f64,
    pub hold_down_s: f64,
    pub recovery_s: f64,
}

/// Live countdowns; `None` means not running.
///
/// A running timer is always within `[0, duration]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerState {
    pub degrade: Option<f64>,
    pub hold_down: Option<f64>,
    pub recovery: Option<f64>,
}

/// Drives the countdowns at the loop's cadence.
#[derive(Debug, Clone, Copy)]
pub struct TimerManager {
    durations: TimerDurations,
    cycle_interval_s: f64,
}

impl TimerManager {
    pub fn new(durations: TimerDurations, cycle_interval_s: f64) -> TimerManager {
        TimerManager {
            durations,
            cycle_interval_s,
        }
    }

    pub fn cycle_interval_s(&self) -> f64 {
        self.cycle_interval_s
    }

    /// Advance the degrade timer. While `demand` holds the timer starts
    /// (first cycle) then counts down; any quiet cycle resets it.
    /// Returns true on the expiry cycle.
    pub fn update_degrade(&self, state: &mut TimerState, demand: bool) -> bool {
        if !demand {
            if state.degrade.is_some() {
                tracing::debug!("degrade timer reset, confidence dropped");
            }
            state.degrade = None;
            return false;
        }
        Self::advance(&mut state.degrade, self.durations.sustain_s, self.cycle_interval_s)
    }

    /// Start the hold-down countdown (on entering the degraded state).
    pub fn start_hold_down(&self, state: &mut TimerState) {
        state.hold_down = Some(self.durations.hold_down_s);
    }

    /// Tick the hold-down timer. Returns true once it has fully
    /// elapsed (and clears it); false while still counting.
    pub fn tick_hold_down(&self, state: &mut TimerState) -> bool {
        match state.hold_down {
            None => true,
            Some(remaining) => {
                let next = remaining - self.cycle_interval_s;
                if next <= 0.0 {
                    state.hold_down = None;
                    true
                } else {
                    state.hold_down = Some(next);
                    false
                }
            }
        }
    }

    /// Advance the recovery timer, same contract as the degrade timer.
    pub fn update_recovery(&self, state: &mut TimerState, demand: bool) -> bool {
        if !demand {
            if state.recovery.is_some() {
                tracing::debug!("recovery timer reset, line not clean");
            }
            state.recovery = None;
            return false;
        }
        Self::advance(
            &mut state.recovery,
            self.durations.recovery_s,
            self.cycle_interval_s,
        )
    }

    /// Shared start-then-count-down step. The starting cycle does not
    /// decrement; expiry is the cycle the countdown reaches zero.
    fn advance(slot: &mut Option<f64>, duration_s: f64, cycle_interval_s: f64) -> bool {
        match *slot {
            None => {
                *slot = Some(duration_s);
                false
            }
            Some(remaining) => {
                let next = (remaining - cycle_interval_s).max(0.0);
                *slot = Some(next);
                next <= 0.0
            }
        }
    }
}
