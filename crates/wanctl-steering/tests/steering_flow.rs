//! End-to-end steering decision flow.
//!
//! Drives assessment → hysteresis → confidence → FSM through full
//! degrade-and-recover episodes without a router, checking the timer
//! gates that make steering deliberate: sustain before steering,
//! hold-down before recovery, flap penalty after oscillation.

use std::time::{Duration, Instant};

use wanctl_common::zone::Zone;
use wanctl_steering::classify::{assess, CongestionSignals, SteeringThresholds, ZoneHysteresis};
use wanctl_steering::confidence::{ConfidenceScorer, ConfidenceWeights};
use wanctl_steering::flap::FlapConfig;
use wanctl_steering::fsm::{FsmInputs, FsmState, SteeringAction, SteeringFsm};
use wanctl_steering::timers::{TimerDurations, TimerManager};

const CYCLE_S: f64 = 0.05;

fn thresholds() -> SteeringThresholds {
    SteeringThresholds::default()
}

fn fsm() -> SteeringFsm {
    SteeringFsm::new(
        TimerManager::new(
            TimerDurations {
                sustain_s: 2.0,
                hold_down_s: 30.0,
                recovery_s: 10.0,
            },
            CYCLE_S,
        ),
        FlapConfig::default(),
        55,
        20,
    )
}

struct Pipeline {
    hysteresis: ZoneHysteresis,
    scorer: ConfidenceScorer,
    fsm: SteeringFsm,
}

impl Pipeline {
    fn new() -> Pipeline {
        Pipeline {
            hysteresis: ZoneHysteresis::new(2, 15),
            scorer: ConfidenceScorer::new(ConfidenceWeights::default(), 3),
            fsm: fsm(),
        }
    }

    /// One cycle through the whole decision path.
    fn cycle(
        &mut self,
        signals: CongestionSignals,
        now: Instant,
    ) -> (Zone, u8, Option<SteeringAction>) {
        let raw = assess(&signals, &thresholds());
        let zone = self.hysteresis.update(raw);
        let score = self.scorer.score(zone, &signals, &thresholds());
        let transition = self.fsm.evaluate_at(
            FsmInputs {
                score: score.score,
                zone,
                drops: signals.drops,
            },
            now,
        );
        (zone, score.score, transition.map(|t| t.action))
    }
}

fn congested() -> CongestionSignals {
    CongestionSignals {
        rtt_delta_ms: 40.0,
        rtt_delta_ewma_ms: 40.0,
        drops: 6,
        queued_packets: 120,
    }
}

fn quiet() -> CongestionSignals {
    CongestionSignals {
        rtt_delta_ms: 1.0,
        rtt_delta_ewma_ms: 1.0,
        drops: 0,
        queued_packets: 2,
    }
}

// ────────────────────────────────────────────────────────────────
// 1. Full degrade episode at the Phase2B inner-loop cadence
// ────────────────────────────────────────────────────────────────

#[test]
fn sustained_congestion_steers_after_the_sustain_window() {
    let mut pipe = Pipeline::new();
    let now = Instant::now();

    let mut enabled_at_cycle = None;
    for cycle in 1..=100 {
        let (_, _, action) = pipe.cycle(congested(), now);
        if action == Some(SteeringAction::EnableSteering) {
            enabled_at_cycle = Some(cycle);
            break;
        }
    }

    // Hysteresis confirms RED on cycle 2; the degrade timer starts
    // there and needs 2 s / 0.05 s = 40 further cycles.
    let cycle = enabled_at_cycle.expect("steering never engaged");
    assert_eq!(cycle, 42);
    assert_eq!(pipe.fsm.state(), FsmState::PrimaryDegraded);
}

#[test]
fn brief_spike_never_steers() {
    let mut pipe = Pipeline::new();
    let now = Instant::now();

    // One second of congestion (20 cycles), then quiet.
    for _ in 0..20 {
        let (_, _, action) = pipe.cycle(congested(), now);
        assert_eq!(action, None);
    }
    for _ in 0..200 {
        let (_, _, action) = pipe.cycle(quiet(), now);
        assert_eq!(action, None);
    }
    assert_eq!(pipe.fsm.state(), FsmState::PrimaryGood);
}

// ────────────────────────────────────────────────────────────────
// 2. Recovery is gated by hold-down plus a clean recovery window
// ────────────────────────────────────────────────────────────────

#[test]
fn recovery_takes_at_least_hold_down_plus_recovery_time() {
    let mut pipe = Pipeline::new();
    let now = Instant::now();

    let mut cycles = 0;
    loop {
        cycles += 1;
        let (_, _, action) = pipe.cycle(congested(), now);
        if action == Some(SteeringAction::EnableSteering) {
            break;
        }
        assert!(cycles < 1000);
    }

    // Line goes instantly clean; count cycles until drain.
    let mut degraded_cycles = 0;
    loop {
        degraded_cycles += 1;
        let (_, _, action) = pipe.cycle(quiet(), now);
        if action == Some(SteeringAction::DisableSteering) {
            break;
        }
        assert!(degraded_cycles < 100_000);
    }

    let elapsed_s = degraded_cycles as f64 * CYCLE_S;
    assert!(
        elapsed_s >= 30.0 + 10.0,
        "drained after only {elapsed_s:.2}s; hold-down must gate recovery"
    );
    assert_eq!(pipe.fsm.state(), FsmState::PrimaryGood);
}

#[test]
fn dirty_line_blocks_recovery_even_after_hold_down() {
    let mut pipe = Pipeline::new();
    let now = Instant::now();

    while pipe.fsm.state() == FsmState::PrimaryGood {
        pipe.cycle(congested(), now);
    }

    // Hold-down worth of cycles plus margin, with residual drops.
    let residual = CongestionSignals {
        rtt_delta_ms: 2.0,
        rtt_delta_ewma_ms: 2.0,
        drops: 1,
        queued_packets: 0,
    };
    for _ in 0..((40.0 / CYCLE_S) as usize) {
        let (_, _, action) = pipe.cycle(residual, now);
        assert_eq!(action, None, "drops must block the recovery timer");
    }
    assert_eq!(pipe.fsm.state(), FsmState::PrimaryDegraded);
}

// ────────────────────────────────────────────────────────────────
// 3. Flap brake raises the bar after repeated episodes
// ────────────────────────────────────────────────────────────────

#[test]
fn repeated_episodes_trigger_the_flap_penalty() {
    let mut pipe = Pipeline::new();
    let t0 = Instant::now();

    for episode in 0..2u64 {
        let now = t0 + Duration::from_secs(episode * 120);
        while pipe.fsm.state() == FsmState::PrimaryGood {
            pipe.cycle(congested(), now);
        }
        while pipe.fsm.state() == FsmState::PrimaryDegraded {
            pipe.cycle(quiet(), now);
        }
    }

    // Four transitions inside the window: the effective threshold is up.
    let now = t0 + Duration::from_secs(250);
    assert!(pipe.fsm.effective_steer_threshold_at(now) > 55);
}

// ────────────────────────────────────────────────────────────────
// 4. The score the FSM sees matches the advertised contributors
// ────────────────────────────────────────────────────────────────

#[test]
fn confirmed_red_scores_all_matching_contributors() {
    let mut pipe = Pipeline::new();
    let now = Instant::now();

    // First congested cycle: hysteresis still reports GREEN (needs 2).
    let (zone, score, _) = pipe.cycle(congested(), now);
    assert_eq!(zone, Zone::Green);
    assert_eq!(score, 35, "HIGH_DROPS + QUEUE_DEEP before RED confirms");

    // Second: RED confirmed, full contribution.
    let (zone, score, _) = pipe.cycle(congested(), now);
    assert_eq!(zone, Zone::Red);
    assert_eq!(score, 75, "RED_ZONE + HIGH_DROPS + QUEUE_DEEP");
}
