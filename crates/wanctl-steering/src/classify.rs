//! Steering-side congestion assessment.
//!
//! Three effective states (GREEN, YELLOW, RED) with compound
//! confirmation: RED needs elevated RTT *and* shaper drops *and* real
//! queue depth — any single signal can lie, all three together do not.
//! Asymmetric streak hysteresis sits on top so a lone bad sample never
//! steers and a lone good sample never drains.

use std::collections::BTreeMap;

use serde::Deserialize;
use wanctl_common::zone::Zone;

/// Multi-signal snapshot for one assessment.
#[derive(Debug, Clone, Copy, Default)]
pub struct CongestionSignals {
    /// Current RTT minus baseline, milliseconds.
    pub rtt_delta_ms: f64,
    /// Smoothed RTT delta, milliseconds.
    pub rtt_delta_ewma_ms: f64,
    /// Shaper drops in this cycle's delta.
    pub drops: u64,
    /// Instantaneous queue depth, packets.
    pub queued_packets: u64,
}

fn default_green_rtt() -> f64 {
    5.0
}
fn default_yellow_rtt() -> f64 {
    15.0
}
fn default_red_rtt() -> f64 {
    15.0
}
fn default_min_drops_red() -> u64 {
    1
}
fn default_min_queue_yellow() -> u64 {
    10
}
fn default_min_queue_red() -> u64 {
    50
}

/// Steering assessment thresholds (`thresholds:` section).
#[derive(Debug, Clone, Deserialize)]
pub struct SteeringThresholds {
    #[serde(default = "default_green_rtt")]
    pub green_rtt_ms: f64,
    #[serde(default = "default_yellow_rtt")]
    pub yellow_rtt_ms: f64,
    #[serde(default = "default_red_rtt")]
    pub red_rtt_ms: f64,
    #[serde(default = "default_min_drops_red")]
    pub min_drops_red: u64,
    #[serde(default = "default_min_queue_yellow")]
    pub min_queue_yellow: u64,
    #[serde(default = "default_min_queue_red")]
    pub min_queue_red: u64,
    pub red_samples_required: Option<u32>,
    pub green_samples_required: Option<u32>,
    /// Deprecated name for red_samples_required.
    pub bad_samples: Option<u32>,
    /// Deprecated name for green_samples_required.
    pub good_samples: Option<u32>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for SteeringThresholds {
    fn default() -> Self {
        SteeringThresholds {
            green_rtt_ms: default_green_rtt(),
            yellow_rtt_ms: default_yellow_rtt(),
            red_rtt_ms: default_red_rtt(),
            min_drops_red: default_min_drops_red(),
            min_queue_yellow: default_min_queue_yellow(),
            min_queue_red: default_min_queue_red(),
            red_samples_required: None,
            green_samples_required: None,
            bad_samples: None,
            good_samples: None,
            unknown: BTreeMap::new(),
        }
    }
}

impl SteeringThresholds {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.green_rtt_ms >= self.yellow_rtt_ms {
            errors.push("thresholds.green_rtt_ms must be < yellow_rtt_ms".into());
        }
        if self.yellow_rtt_ms > self.red_rtt_ms {
            errors.push("thresholds.yellow_rtt_ms must be <= red_rtt_ms".into());
        }
        if self.min_drops_red == 0 {
            errors.push("thresholds.min_drops_red must be positive".into());
        }
    }
}

/// One memoryless assessment from the compound rules.
///
/// RED: elevated smoothed delta AND drops AND deep queue.
/// YELLOW: elevated delta OR rising queue.
/// GREEN: otherwise.
pub fn assess(signals: &CongestionSignals, thresholds: &SteeringThresholds) -> Zone {
    let ewma = signals.rtt_delta_ewma_ms;
    if ewma > thresholds.red_rtt_ms
        && signals.drops >= thresholds.min_drops_red
        && signals.queued_packets >= thresholds.min_queue_red
    {
        tracing::debug!(
            ewma_ms = ewma,
            drops = signals.drops,
            queue = signals.queued_packets,
            "assessment: RED"
        );
        Zone::Red
    } else if ewma > thresholds.yellow_rtt_ms
        || signals.queued_packets >= thresholds.min_queue_yellow
    {
        Zone::Yellow
    } else {
        Zone::Green
    }
}

/// Asymmetric streak hysteresis over raw assessments.
///
/// RED is reported only after `red_required` consecutive raw REDs;
/// dropping back to GREEN from RED takes `green_required` consecutive
/// raw GREENs. YELLOW passes through.
#[derive(Debug)]
pub struct ZoneHysteresis {
    red_required: u32,
    green_required: u32,
    red_streak: u32,
    green_streak: u32,
    reported: Zone,
}

impl ZoneHysteresis {
    pub fn new(red_required: u32, green_required: u32) -> ZoneHysteresis {
        ZoneHysteresis {
            red_required: red_required.max(1),
            green_required: green_required.max(1),
            red_streak: 0,
            green_streak: 0,
            reported: Zone::Green,
        }
    }

    /// Feed one raw assessment, get the hysteresis-filtered zone.
    pub fn update(&mut self, raw: Zone) -> Zone {
        match raw {
            Zone::Red | Zone::SoftRed => {
                self.red_streak += 1;
                self.green_streak = 0;
                if self.red_streak >= self.red_required {
                    self.reported = Zone::Red;
                }
            }
            Zone::Yellow => {
                self.red_streak = 0;
                self.green_streak = 0;
                if self.reported != Zone::Red {
                    self.reported = Zone::Yellow;
                }
            }
            Zone::Green => {
                self.red_streak = 0;
                self.green_streak += 1;
                if self.reported == Zone::Red {
                    if self.green_streak >= self.green_required {
                        self.reported = Zone::Green;
                    }
                } else {
                    self.reported = Zone::Green;
                }
            }
        }
        self.reported
    }

    pub fn reported(&self) -> Zone {
        self.reported
    }
}
