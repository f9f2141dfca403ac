//! Congestion classification from the RTT delta.
//!
//! The zone comes from `d = rtt - baseline` against three bloat
//! thresholds. Hysteresis lives in the queue controller's streak
//! counters, not here — classification is memoryless.

use wanctl_common::zone::Zone;

/// Bloat thresholds in milliseconds of delta over baseline.
#[derive(Debug, Clone, Copy)]
pub struct BloatThresholds {
    /// Below this the line is healthy.
    pub target_ms: f64,
    /// From here the line is warming up.
    pub warn_ms: f64,
    /// From here congestion is critical.
    pub hard_red_ms: f64,
}

impl BloatThresholds {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.target_ms <= 0.0 {
            errors.push("thresholds.target_bloat_ms must be positive".into());
        }
        if self.target_ms >= self.warn_ms {
            errors.push("thresholds.target_bloat_ms must be < warn_bloat_ms".into());
        }
        if self.warn_ms >= self.hard_red_ms {
            errors.push("thresholds.warn_bloat_ms must be < hard_red_bloat_ms".into());
        }
    }
}

/// Map an RTT delta to its zone.
pub fn classify_delta(delta_ms: f64, thresholds: &BloatThresholds) -> Zone {
    if delta_ms >= thresholds.hard_red_ms {
        Zone::Red
    } else if delta_ms >= thresholds.warn_ms {
        Zone::SoftRed
    } else if delta_ms >= thresholds.target_ms {
        Zone::Yellow
    } else {
        Zone::Green
    }
}
