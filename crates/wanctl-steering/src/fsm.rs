//! The steering state machine.
//!
//! Two states. PRIMARY_GOOD watches the confidence score; once it holds
//! above the steer threshold for the sustain duration, the FSM enters
//! PRIMARY_DEGRADED and asks for the mangle rule to be enabled.
//! PRIMARY_DEGRADED first serves out the hold-down, then requires the
//! score low *and* the line clean (GREEN, zero drops) for the recovery
//! duration before draining back. Transitions feed the flap brake,
//! which can raise the steer threshold.

use std::time::Instant;

use serde::Serialize;
use wanctl_common::zone::Zone;

use crate::flap::{FlapConfig, FlapDetector};
use crate::timers::{TimerManager, TimerState};

/// FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FsmState {
    PrimaryGood,
    PrimaryDegraded,
}

impl FsmState {
    pub fn as_str(self) -> &'static str {
        match self {
            FsmState::PrimaryGood => "PRIMARY_GOOD",
            FsmState::PrimaryDegraded => "PRIMARY_DEGRADED",
        }
    }

    pub fn parse(s: &str) -> Option<FsmState> {
        match s {
            "PRIMARY_GOOD" => Some(FsmState::PrimaryGood),
            "PRIMARY_DEGRADED" => Some(FsmState::PrimaryDegraded),
            _ => None,
        }
    }
}

/// What the daemon must do about a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteeringAction {
    EnableSteering,
    DisableSteering,
}

/// A committed FSM transition.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: FsmState,
    pub to: FsmState,
    pub action: SteeringAction,
}

/// Per-cycle FSM inputs.
#[derive(Debug, Clone, Copy)]
pub struct FsmInputs {
    pub score: u8,
    pub zone: Zone,
    pub drops: u64,
}

/// The steering FSM with its timers and flap brake.
#[derive(Debug)]
pub struct SteeringFsm {
    state: FsmState,
    timers: TimerManager,
    timer_state: TimerState,
    flap: FlapDetector,
    steer_threshold: u8,
    recovery_threshold: u8,
}

impl SteeringFsm {
    pub fn new(
        timers: TimerManager,
        flap_config: FlapConfig,
        steer_threshold: u8,
        recovery_threshold: u8,
    ) -> SteeringFsm {
        SteeringFsm {
            state: FsmState::PrimaryGood,
            timers,
            timer_state: TimerState::default(),
            flap: FlapDetector::new(flap_config),
            steer_threshold,
            recovery_threshold,
        }
    }

    /// Resume a persisted state (daemon restart while steered). The
    /// hold-down restarts from the full duration — conservative, but a
    /// restart must never shortcut a drain.
    pub fn resume(&mut self, state: FsmState) {
        if state == FsmState::PrimaryDegraded && self.state == FsmState::PrimaryGood {
            self.state = FsmState::PrimaryDegraded;
            self.timers.start_hold_down(&mut self.timer_state);
            tracing::info!("resumed in PRIMARY_DEGRADED, hold-down restarted");
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn timer_state(&self) -> &TimerState {
        &self.timer_state
    }

    /// The steer threshold currently in force (flap penalty included).
    pub fn effective_steer_threshold(&mut self) -> u8 {
        self.effective_steer_threshold_at(Instant::now())
    }

    pub fn effective_steer_threshold_at(&mut self, now: Instant) -> u8 {
        self.steer_threshold
            .saturating_add(self.flap.threshold_adjustment_at(now))
    }

    pub fn is_flap_penalized(&self) -> bool {
        self.flap.is_penalized_at(Instant::now())
    }

    /// Evaluate one cycle. Returns a transition when one fired.
    pub fn evaluate(&mut self, inputs: FsmInputs) -> Option<Transition> {
        self.evaluate_at(inputs, Instant::now())
    }

    pub fn evaluate_at(&mut self, inputs: FsmInputs, now: Instant) -> Option<Transition> {
        match self.state {
            FsmState::PrimaryGood => {
                let threshold = self.effective_steer_threshold_at(now);
                let demand = inputs.score >= threshold;
                if self.timers.update_degrade(&mut self.timer_state, demand) {
                    self.timer_state.degrade = None;
                    self.timer_state.recovery = None;
                    self.timers.start_hold_down(&mut self.timer_state);
                    self.state = FsmState::PrimaryDegraded;
                    self.flap.record_transition_at(now);
                    tracing::warn!(
                        score = inputs.score,
                        threshold,
                        "sustained degradation confirmed, steering to secondary"
                    );
                    return Some(Transition {
                        from: FsmState::PrimaryGood,
                        to: FsmState::PrimaryDegraded,
                        action: SteeringAction::EnableSteering,
                    });
                }
                None
            }
            FsmState::PrimaryDegraded => {
                // No recovery attempt until the hold-down has elapsed.
                if !self.timers.tick_hold_down(&mut self.timer_state) {
                    return None;
                }
                let clean = inputs.score <= self.recovery_threshold
                    && inputs.zone == Zone::Green
                    && inputs.drops == 0;
                if self.timers.update_recovery(&mut self.timer_state, clean) {
                    self.timer_state.recovery = None;
                    self.state = FsmState::PrimaryGood;
                    self.flap.record_transition_at(now);
                    tracing::info!(
                        score = inputs.score,
                        "primary recovered, draining back"
                    );
                    return Some(Transition {
                        from: FsmState::PrimaryDegraded,
                        to: FsmState::PrimaryGood,
                        action: SteeringAction::DisableSteering,
                    });
                }
                None
            }
        }
    }
}
