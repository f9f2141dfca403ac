//! Baseline RTT estimation.
//!
//! The baseline is the reference for every delta calculation, so it
//! must only learn from an idle line — otherwise sustained congestion
//! would teach the controller that bloat is normal. Updates are a slow
//! EWMA and are rejected outright if the result would leave the
//! configured bounds.

use wanctl_common::ewma::ewma_update;

/// Bounded, idle-gated baseline estimator.
#[derive(Debug, Clone)]
pub struct BaselineEstimator {
    baseline: f64,
    min_ms: f64,
    max_ms: f64,
    alpha: f64,
    /// Max |rtt - load_rtt| for the line to count as idle.
    update_threshold_ms: f64,
    /// Max instantaneous queue depth for the line to count as idle.
    idle_queue_packets_max: u64,
}

impl BaselineEstimator {
    pub fn new(
        initial: f64,
        min_ms: f64,
        max_ms: f64,
        alpha: f64,
        update_threshold_ms: f64,
        idle_queue_packets_max: u64,
    ) -> BaselineEstimator {
        BaselineEstimator {
            baseline: initial.clamp(min_ms, max_ms),
            min_ms,
            max_ms,
            alpha,
            update_threshold_ms,
            idle_queue_packets_max,
        }
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Restore a persisted baseline, clamped into bounds.
    pub fn restore(&mut self, baseline: f64) {
        if baseline > 0.0 {
            self.baseline = baseline.clamp(self.min_ms, self.max_ms);
        }
    }

    /// Whether this cycle's signals describe an idle line.
    pub fn is_idle(&self, rtt_ms: f64, load_rtt_ms: f64, drops: u64, queued_packets: u64) -> bool {
        (rtt_ms - load_rtt_ms).abs() < self.update_threshold_ms
            && drops == 0
            && queued_packets < self.idle_queue_packets_max
    }

    /// Apply one idle-cycle observation.
    ///
    /// Returns whether the baseline moved. An update whose result would
    /// fall outside `[min, max]` is rejected and logged; the baseline
    /// stays put.
    pub fn observe_idle(&mut self, rtt_ms: f64) -> bool {
        let candidate = ewma_update(self.baseline, rtt_ms, self.alpha);
        if candidate < self.min_ms || candidate > self.max_ms {
            tracing::warn!(
                baseline = self.baseline,
                candidate,
                min = self.min_ms,
                max = self.max_ms,
                "baseline update rejected: candidate outside bounds"
            );
            return false;
        }
        self.baseline = candidate;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(initial: f64) -> BaselineEstimator {
        BaselineEstimator::new(initial, 10.0, 60.0, 0.05, 3.0, 5)
    }

    #[test]
    fn initial_is_clamped_into_bounds() {
        assert_eq!(estimator(5.0).baseline(), 10.0);
        assert_eq!(estimator(100.0).baseline(), 60.0);
        assert_eq!(estimator(20.0).baseline(), 20.0);
    }

    #[test]
    fn idle_requires_all_three_signals() {
        let e = estimator(20.0);
        assert!(e.is_idle(20.5, 20.0, 0, 0));
        assert!(!e.is_idle(30.0, 20.0, 0, 0), "rtt far from load ewma");
        assert!(!e.is_idle(20.5, 20.0, 1, 0), "drops present");
        assert!(!e.is_idle(20.5, 20.0, 0, 50), "queue deep");
    }

    #[test]
    fn idle_update_moves_slowly() {
        let mut e = estimator(20.0);
        assert!(e.observe_idle(30.0));
        assert!((e.baseline() - 20.5).abs() < 1e-9);
    }

    #[test]
    fn out_of_bounds_update_is_rejected() {
        // Near the upper bound a big sample would push past it:
        // baseline 58, bounds [10, 60], alpha 0.5, measured 100.
        let mut e = BaselineEstimator::new(58.0, 10.0, 60.0, 0.5, 3.0, 5);
        let moved = e.observe_idle(100.0);
        assert!(!moved, "candidate 79 is outside [10, 60]");
        assert_eq!(e.baseline(), 58.0, "baseline must not change on rejection");
    }

    #[test]
    fn update_landing_inside_bounds_is_accepted() {
        let mut e = BaselineEstimator::new(58.0, 10.0, 60.0, 0.5, 3.0, 5);
        assert!(e.observe_idle(60.0));
        assert_eq!(e.baseline(), 59.0);
    }

    #[test]
    fn restore_ignores_unlearned_state() {
        let mut e = estimator(20.0);
        e.restore(0.0);
        assert_eq!(e.baseline(), 20.0);
        e.restore(35.0);
        assert_eq!(e.baseline(), 35.0);
        e.restore(500.0);
        assert_eq!(e.baseline(), 60.0, "restored value is clamped");
    }
}
