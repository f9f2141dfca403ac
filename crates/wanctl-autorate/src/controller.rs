//! Queue controller — zone to rate action.
//!
//! Per direction: multiplicative decrease on RED from a single sample,
//! a gentler decrease on sustained SOFT_RED, hold on YELLOW, additive
//! increase only after enough consecutive GREEN samples. The result is
//! always clamped between the zone's floor and the ceiling.
//!
//! The asymmetry is the point: congestion is acted on immediately,
//! recovery must prove itself.

use wanctl_common::ewma::ewma_update;
use wanctl_common::zone::Zone;

use crate::baseline::BaselineEstimator;
use crate::classify::{classify_delta, BloatThresholds};

/// Per-direction tuning, all rates in bits per second.
#[derive(Debug, Clone, Copy)]
pub struct DirectionSettings {
    pub floor_green_bps: u64,
    pub floor_yellow_bps: u64,
    pub floor_soft_red_bps: u64,
    pub floor_red_bps: u64,
    pub ceiling_bps: u64,
    pub step_up_bps: u64,
    pub factor_down: f64,
    /// Consecutive GREEN samples before a step-up.
    pub green_required: u32,
    /// Consecutive SOFT_RED samples before the gentle decrease.
    pub soft_red_required: u32,
}

impl DirectionSettings {
    /// SOFT_RED decreases with the square root of the RED factor — a
    /// half-strength cut on the logarithmic scale.
    pub fn factor_soft_red(&self) -> f64 {
        self.factor_down.sqrt()
    }

    /// The floor that binds in a given zone.
    pub fn floor_for(&self, zone: Zone) -> u64 {
        match zone {
            Zone::Green => self.floor_green_bps,
            Zone::Yellow => self.floor_yellow_bps,
            Zone::SoftRed => self.floor_soft_red_bps,
            Zone::Red => self.floor_red_bps,
        }
    }

    pub fn validate(&self, direction: &str, errors: &mut Vec<String>) {
        let floors = [
            self.floor_red_bps,
            self.floor_soft_red_bps,
            self.floor_yellow_bps,
            self.floor_green_bps,
        ];
        if floors.windows(2).any(|w| w[0] > w[1]) {
            errors.push(format!(
                "{direction}: floors must satisfy red <= soft_red <= yellow <= green"
            ));
        }
        if self.floor_green_bps > self.ceiling_bps {
            errors.push(format!("{direction}: floors must not exceed ceiling"));
        }
        if !(0.0..1.0).contains(&self.factor_down) || self.factor_down <= 0.0 {
            errors.push(format!(
                "{direction}: factor_down must be in (0, 1), got {}",
                self.factor_down
            ));
        }
        if self.step_up_bps == 0 {
            errors.push(format!("{direction}: step_up must be positive"));
        }
        if self.green_required == 0 {
            errors.push(format!("{direction}: green_samples_required must be >= 1"));
        }
        if self.soft_red_required == 0 {
            errors.push(format!("{direction}: soft_red_samples_required must be >= 1"));
        }
    }
}

/// One direction of one WAN.
#[derive(Debug)]
pub struct QueueController {
    settings: DirectionSettings,
    current_rate_bps: u64,
    red_streak: u32,
    soft_red_streak: u32,
    green_streak: u32,
}

impl QueueController {
    /// Start from a restored or router-read rate, clamped into the
    /// weakest floor and the ceiling.
    pub fn new(settings: DirectionSettings, initial_rate_bps: u64) -> QueueController {
        QueueController {
            current_rate_bps: initial_rate_bps.clamp(settings.floor_red_bps, settings.ceiling_bps),
            settings,
            red_streak: 0,
            soft_red_streak: 0,
            green_streak: 0,
        }
    }

    /// Compute this cycle's target rate for the classified zone.
    ///
    /// Streaks advance here, but `current_rate` does not — the caller
    /// commits only after the router write succeeds, so a failed write
    /// leaves the applied rate untouched.
    pub fn evaluate(&mut self, zone: Zone) -> u64 {
        let current = self.current_rate_bps as f64;
        let target = match zone {
            Zone::Red => {
                self.red_streak += 1;
                self.soft_red_streak = 0;
                self.green_streak = 0;
                (current * self.settings.factor_down) as u64
            }
            Zone::SoftRed => {
                self.soft_red_streak += 1;
                self.red_streak = 0;
                self.green_streak = 0;
                if self.soft_red_streak >= self.settings.soft_red_required {
                    (current * self.settings.factor_soft_red()) as u64
                } else {
                    self.current_rate_bps
                }
            }
            Zone::Yellow => {
                self.red_streak = 0;
                self.soft_red_streak = 0;
                self.green_streak = 0;
                self.current_rate_bps
            }
            Zone::Green => {
                self.green_streak += 1;
                self.red_streak = 0;
                self.soft_red_streak = 0;
                if self.green_streak >= self.settings.green_required {
                    self.current_rate_bps + self.settings.step_up_bps
                } else {
                    self.current_rate_bps
                }
            }
        };
        target.clamp(self.settings.floor_for(zone), self.settings.ceiling_bps)
    }

    /// Record that `rate` was actually applied on the router.
    pub fn commit(&mut self, rate_bps: u64) {
        self.current_rate_bps = rate_bps;
    }

    pub fn current_rate_bps(&self) -> u64 {
        self.current_rate_bps
    }

    pub fn settings(&self) -> &DirectionSettings {
        &self.settings
    }

    /// Most likely current state derived from the streak counters, for
    /// the health endpoint.
    pub fn state_str(&self) -> &'static str {
        if self.red_streak > 0 {
            "RED"
        } else if self.soft_red_streak >= self.settings.soft_red_required {
            "SOFT_RED"
        } else if self.green_streak > 0 {
            "GREEN"
        } else {
            "YELLOW"
        }
    }
}

/// What one cycle decided for one WAN.
#[derive(Debug, Clone, Copy)]
pub struct CycleDecision {
    pub zone: Zone,
    pub delta_ms: f64,
    pub download_target_bps: u64,
    pub upload_target_bps: u64,
}

/// Full per-WAN controller: baseline, load EWMA, and both directions.
#[derive(Debug)]
pub struct WanController {
    pub wan_name: String,
    pub baseline: BaselineEstimator,
    pub thresholds: BloatThresholds,
    pub download: QueueController,
    pub upload: QueueController,
    load_rtt: f64,
    load_beta: f64,
    zone: Zone,
}

impl WanController {
    pub fn new(
        wan_name: String,
        baseline: BaselineEstimator,
        thresholds: BloatThresholds,
        download: QueueController,
        upload: QueueController,
        load_beta: f64,
    ) -> WanController {
        WanController {
            wan_name,
            baseline,
            thresholds,
            download,
            upload,
            load_rtt: 0.0,
            load_beta,
            zone: Zone::Green,
        }
    }

    pub fn load_rtt(&self) -> f64 {
        self.load_rtt
    }

    pub fn restore_load_rtt(&mut self, load_rtt: f64) {
        if load_rtt > 0.0 {
            self.load_rtt = load_rtt;
        }
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// Run one measurement through classification, baseline learning,
    /// and both direction controllers.
    ///
    /// Classification uses the pre-update baseline; the baseline only
    /// learns afterwards, and only from an idle line.
    pub fn observe(&mut self, rtt_ms: f64, drops: u64, queued_packets: u64) -> CycleDecision {
        self.load_rtt = ewma_update(self.load_rtt, rtt_ms, self.load_beta);

        let delta_ms = rtt_ms - self.baseline.baseline();
        let zone = classify_delta(delta_ms, &self.thresholds);
        self.zone = zone;

        if self
            .baseline
            .is_idle(rtt_ms, self.load_rtt, drops, queued_packets)
        {
            self.baseline.observe_idle(rtt_ms);
        }

        // Directions are evaluated independently; they share no state.
        let download_target_bps = self.download.evaluate(zone);
        let upload_target_bps = self.upload.evaluate(zone);

        CycleDecision {
            zone,
            delta_ms,
            download_target_bps,
            upload_target_bps,
        }
    }
}
