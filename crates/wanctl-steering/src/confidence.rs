//! Confidence scoring.
//!
//! A small rule set turns the cycle's signals into an integer score
//! (0-100) built from named contributors. The score is computed fresh
//! every cycle — nothing is sampled or smoothed here; persistence comes
//! from the sustain timers, not the score.

use wanctl_common::zone::Zone;

use crate::classify::{CongestionSignals, SteeringThresholds};

/// Contributor weights; defaults sum to 90 of a 100-point scale.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceWeights {
    pub red_zone: u8,
    pub sustained_yellow: u8,
    pub high_drops: u8,
    pub queue_deep: u8,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        ConfidenceWeights {
            red_zone: 40,
            sustained_yellow: 15,
            high_drops: 20,
            queue_deep: 15,
        }
    }
}

/// One cycle's score with its contributor names.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScore {
    pub score: u8,
    pub contributors: Vec<&'static str>,
}

/// Scorer; the only state it keeps is the yellow streak that backs the
/// SUSTAINED_YELLOW contributor.
#[derive(Debug)]
pub struct ConfidenceScorer {
    weights: ConfidenceWeights,
    sustained_yellow_cycles: u32,
    yellow_streak: u32,
}

impl ConfidenceScorer {
    pub fn new(weights: ConfidenceWeights, sustained_yellow_cycles: u32) -> ConfidenceScorer {
        ConfidenceScorer {
            weights,
            sustained_yellow_cycles: sustained_yellow_cycles.max(1),
            yellow_streak: 0,
        }
    }

    /// Score this cycle from the filtered zone and raw signals.
    pub fn score(
        &mut self,
        zone: Zone,
        signals: &CongestionSignals,
        thresholds: &SteeringThresholds,
    ) -> ConfidenceScore {
        if zone == Zone::Yellow {
            self.yellow_streak += 1;
        } else {
            self.yellow_streak = 0;
        }

        let mut total: u32 = 0;
        let mut contributors = Vec::new();

        if zone == Zone::Red {
            total += u32::from(self.weights.red_zone);
            contributors.push("RED_ZONE");
        }
        if self.yellow_streak >= self.sustained_yellow_cycles {
            total += u32::from(self.weights.sustained_yellow);
            contributors.push("SUSTAINED_YELLOW");
        }
        if signals.drops >= thresholds.min_drops_red {
            total += u32::from(self.weights.high_drops);
            contributors.push("HIGH_DROPS");
        }
        if signals.queued_packets >= thresholds.min_queue_red {
            total += u32::from(self.weights.queue_deep);
            contributors.push("QUEUE_DEEP");
        }

        ConfidenceScore {
            score: total.min(100) as u8,
            contributors,
        }
    }
}
