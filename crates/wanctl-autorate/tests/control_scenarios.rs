//! Control-path scenario tests.
//!
//! Drives the classifier, queue controllers, baseline estimator,
//! pending buffer and rate limiter together the way the control loop
//! does — no router, no clock — and checks the bound invariants over
//! whole traces: floors and ceiling always hold, hysteresis is
//! asymmetric, and a router outage never relaxes a limit.

use std::time::{Duration, Instant};

use wanctl_autorate::baseline::BaselineEstimator;
use wanctl_autorate::classify::{classify_delta, BloatThresholds};
use wanctl_autorate::controller::{DirectionSettings, QueueController, WanController};
use wanctl_autorate::pending::PendingRateChange;
use wanctl_autorate::ratelimit::RateLimiter;
use wanctl_common::zone::Zone;

fn thresholds() -> BloatThresholds {
    BloatThresholds {
        target_ms: 5.0,
        warn_ms: 15.0,
        hard_red_ms: 40.0,
    }
}

fn download_settings() -> DirectionSettings {
    DirectionSettings {
        floor_green_bps: 500_000_000,
        floor_yellow_bps: 450_000_000,
        floor_soft_red_bps: 350_000_000,
        floor_red_bps: 300_000_000,
        ceiling_bps: 940_000_000,
        step_up_bps: 10_000_000,
        factor_down: 0.85,
        green_required: 5,
        soft_red_required: 2,
    }
}

fn upload_settings() -> DirectionSettings {
    DirectionSettings {
        floor_green_bps: 20_000_000,
        floor_yellow_bps: 20_000_000,
        floor_soft_red_bps: 18_000_000,
        floor_red_bps: 15_000_000,
        ceiling_bps: 40_000_000,
        step_up_bps: 1_000_000,
        factor_down: 0.85,
        green_required: 5,
        soft_red_required: 2,
    }
}

fn make_wan() -> WanController {
    WanController::new(
        "spectrum".into(),
        BaselineEstimator::new(20.0, 10.0, 60.0, 0.05, 3.0, 5),
        thresholds(),
        QueueController::new(download_settings(), 800_000_000),
        QueueController::new(upload_settings(), 35_000_000),
        0.3,
    )
}

// ────────────────────────────────────────────────────────────────
// 1. Bounds hold across an arbitrary congestion trace
// ────────────────────────────────────────────────────────────────

#[test]
fn rates_never_leave_floor_ceiling_bounds() {
    let mut wan = make_wan();
    // A rough day: calm, spike, sustained red, slow recovery, calm.
    let rtts: Vec<f64> = std::iter::empty()
        .chain(std::iter::repeat(21.0).take(20))
        .chain(std::iter::repeat(70.0).take(10))
        .chain(std::iter::repeat(120.0).take(30))
        .chain(std::iter::repeat(28.0).take(10))
        .chain(std::iter::repeat(21.0).take(60))
        .collect();

    for rtt in rtts {
        let drops = if rtt > 60.0 { 8 } else { 0 };
        let queued = if rtt > 60.0 { 90 } else { 0 };
        let decision = wan.observe(rtt, drops, queued);

        let dl_floor = download_settings().floor_for(decision.zone);
        assert!(
            decision.download_target_bps >= dl_floor,
            "download target {} below {} floor for {}",
            decision.download_target_bps,
            dl_floor,
            decision.zone
        );
        assert!(decision.download_target_bps <= download_settings().ceiling_bps);

        let ul_floor = upload_settings().floor_for(decision.zone);
        assert!(decision.upload_target_bps >= ul_floor);
        assert!(decision.upload_target_bps <= upload_settings().ceiling_bps);

        // The loop commits what it writes; simulate always-successful writes.
        wan.download.commit(decision.download_target_bps);
        wan.upload.commit(decision.upload_target_bps);
    }
}

// ────────────────────────────────────────────────────────────────
// 2. Asymmetric hysteresis across a full dip-and-recover trace
// ────────────────────────────────────────────────────────────────

#[test]
fn one_red_cuts_but_recovery_takes_a_streak() {
    let mut wan = make_wan();
    // Settle at a steady rate.
    for _ in 0..3 {
        let d = wan.observe(21.0, 0, 0);
        wan.download.commit(d.download_target_bps);
        wan.upload.commit(d.upload_target_bps);
    }
    let before = wan.download.current_rate_bps();

    // One RED sample: immediate multiplicative cut.
    let red = wan.observe(90.0, 10, 100);
    assert_eq!(red.zone, Zone::Red);
    assert!(red.download_target_bps < before);
    wan.download.commit(red.download_target_bps);
    wan.upload.commit(red.upload_target_bps);
    let cut_rate = wan.download.current_rate_bps();

    // Four clean cycles: still no step-up (green_required = 5).
    for _ in 0..4 {
        let d = wan.observe(21.0, 0, 0);
        assert_eq!(
            d.download_target_bps, cut_rate,
            "no increase before the green streak completes"
        );
        wan.download.commit(d.download_target_bps);
        wan.upload.commit(d.upload_target_bps);
    }

    // Fifth green: additive step-up.
    let d = wan.observe(21.0, 0, 0);
    assert_eq!(d.download_target_bps, cut_rate + 10_000_000);
}

// ────────────────────────────────────────────────────────────────
// 3. Router outage: queue, replay fresh, drop stale
// ────────────────────────────────────────────────────────────────

#[test]
fn outage_queues_pairs_and_staleness_drops_them() {
    let max_age = Duration::from_secs(60);
    let mut pending = PendingRateChange::new();
    let t0 = Instant::now();

    // Cycles 10-15: router down, the same computed pair re-queued.
    for cycle in 0..6 {
        pending.queue_at(800_000_000, 35_000_000, t0 + Duration::from_secs(2 * cycle));
    }
    // Reconnect 12 s after the last queue: fresh, applied.
    let reconnect = t0 + Duration::from_secs(2 * 5 + 12);
    assert!(!pending.is_stale_at(max_age, reconnect));
    assert_eq!(pending.pending(), Some((800_000_000, 35_000_000)));
    pending.clear();

    // Second outage queues a new pair, then the router stays away 140 s.
    let t1 = reconnect + Duration::from_secs(30);
    pending.queue_at(700_000_000, 30_000_000, t1);
    let late_reconnect = t1 + Duration::from_secs(140);
    assert!(
        pending.is_stale_at(max_age, late_reconnect),
        "a 140s-old pair must be dropped, not applied"
    );
}

#[test]
fn failed_write_leaves_applied_rate_untouched() {
    let mut wan = make_wan();
    let mut pending = PendingRateChange::new();

    let decision = wan.observe(120.0, 10, 100);
    assert!(decision.download_target_bps < wan.download.current_rate_bps());

    // Router write fails: no commit, pair parked.
    pending.queue(decision.download_target_bps, decision.upload_target_bps);
    assert_eq!(wan.download.current_rate_bps(), 800_000_000);
    assert_eq!(wan.upload.current_rate_bps(), 35_000_000);
    assert!(pending.has_pending());
}

// ────────────────────────────────────────────────────────────────
// 4. Rate limiter bounds the write budget over any window
// ────────────────────────────────────────────────────────────────

#[test]
fn writes_stay_within_the_sliding_window_budget() {
    let window = Duration::from_secs(60);
    let mut limiter = RateLimiter::new(10, window);
    let t0 = Instant::now();

    let mut write_times = Vec::new();
    // Try to write every second for five minutes.
    for s in 0..300u64 {
        let now = t0 + Duration::from_secs(s);
        if limiter.can_change_at(now) {
            limiter.record_change_at(now);
            write_times.push(now);
        }
    }

    // Check every sliding window of 60 s.
    for (i, &start) in write_times.iter().enumerate() {
        let in_window = write_times[i..]
            .iter()
            .take_while(|&&t| t.duration_since(start) <= window)
            .count();
        assert!(
            in_window <= 10,
            "window starting at write {i} saw {in_window} writes"
        );
    }
}

// ────────────────────────────────────────────────────────────────
// 5. Baseline learning across load and idle phases
// ────────────────────────────────────────────────────────────────

#[test]
fn baseline_learns_only_when_idle_and_stays_bounded() {
    let mut wan = make_wan();

    // Idle phase: baseline drifts toward the measured RTT.
    for _ in 0..50 {
        wan.observe(24.0, 0, 0);
    }
    let learned = wan.baseline.baseline();
    assert!(learned > 20.0 && learned < 24.5);

    // Load phase: drops present, baseline frozen despite huge RTTs.
    for _ in 0..50 {
        wan.observe(150.0, 20, 200);
    }
    assert_eq!(wan.baseline.baseline(), learned);

    // The bounds hold whatever the inputs.
    for _ in 0..200 {
        wan.observe(59.9, 0, 0);
        let b = wan.baseline.baseline();
        assert!((10.0..=60.0).contains(&b), "baseline out of bounds: {b}");
    }

    // The reported delta and zone stay consistent with each other.
    let decision = wan.observe(learned + 2.0, 0, 0);
    assert_eq!(classify_delta(decision.delta_ms, &thresholds()), decision.zone);
}
