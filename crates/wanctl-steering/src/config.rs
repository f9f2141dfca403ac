//! Steering daemon configuration.
//!
//! One YAML file per primary/secondary pair. The assessment thresholds
//! accept the deprecated `bad_samples`/`good_samples` names with a
//! one-time warning; unknown keys warn and are ignored.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use wanctl_common::config::{
    load_yaml, warn_deprecated, warn_unknown_keys, ConfigError, HealthSection, MeasurementSection,
    QueuesSection, RouterSection,
};

use crate::classify::SteeringThresholds;
use crate::flap::FlapConfig;
use crate::timers::TimerDurations;

/// Default bind for the steering health endpoint.
pub const DEFAULT_HEALTH_PORT: u16 = 9102;

#[derive(Debug, Deserialize)]
struct RawConfig {
    /// Primary WAN name; used as the metrics label.
    wan_name: String,
    /// Secondary WAN latency traffic is diverted to.
    secondary_wan: String,
    router: RouterSection,
    queues: QueuesSection,
    steering: RawSteering,
    #[serde(default)]
    flap: RawFlap,
    #[serde(default)]
    thresholds: SteeringThresholds,
    measurement: MeasurementSection,
    baseline_rtt_initial: f64,
    #[serde(default = "default_baseline_min")]
    baseline_rtt_min: f64,
    #[serde(default = "default_baseline_max")]
    baseline_rtt_max: f64,
    #[serde(default = "default_baseline_alpha")]
    baseline_alpha: f64,
    #[serde(default = "default_delta_ewma_alpha")]
    delta_ewma_alpha: f64,
    state_file: PathBuf,
    lock_file: PathBuf,
    #[serde(default = "default_lock_timeout_s")]
    lock_timeout: u64,
    #[serde(default = "default_metrics_db")]
    metrics_db: PathBuf,
    #[serde(default = "default_retention_days")]
    retention_days: u32,
    health: Option<HealthSection>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawSteering {
    rule_comment: String,
    #[serde(default)]
    dry_run: bool,
    #[serde(default = "default_steer_threshold")]
    steer_threshold: u8,
    #[serde(default = "default_recovery_threshold")]
    recovery_threshold: u8,
    #[serde(default = "default_sustain_s")]
    sustain_duration_s: f64,
    #[serde(default = "default_hold_down_s")]
    hold_down_duration_s: f64,
    #[serde(default = "default_recovery_s")]
    recovery_duration_s: f64,
    #[serde(default = "default_sustained_yellow_cycles")]
    sustained_yellow_cycles: u32,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawFlap {
    #[serde(default = "default_flap_window_minutes")]
    window_minutes: u64,
    #[serde(default = "default_flap_max_toggles")]
    max_toggles: usize,
    #[serde(default = "default_flap_penalty_add")]
    penalty_threshold_add: u8,
    #[serde(default = "default_flap_penalty_s")]
    penalty_duration_s: u64,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for RawFlap {
    fn default() -> Self {
        RawFlap {
            window_minutes: default_flap_window_minutes(),
            max_toggles: default_flap_max_toggles(),
            penalty_threshold_add: default_flap_penalty_add(),
            penalty_duration_s: default_flap_penalty_s(),
            unknown: BTreeMap::new(),
        }
    }
}

fn default_steer_threshold() -> u8 {
    55
}
fn default_recovery_threshold() -> u8 {
    20
}
fn default_sustain_s() -> f64 {
    2.0
}
fn default_hold_down_s() -> f64 {
    30.0
}
fn default_recovery_s() -> f64 {
    10.0
}
fn default_sustained_yellow_cycles() -> u32 {
    3
}
fn default_flap_window_minutes() -> u64 {
    10
}
fn default_flap_max_toggles() -> usize {
    3
}
fn default_flap_penalty_add() -> u8 {
    15
}
fn default_flap_penalty_s() -> u64 {
    300
}
fn default_baseline_min() -> f64 {
    10.0
}
fn default_baseline_max() -> f64 {
    60.0
}
fn default_baseline_alpha() -> f64 {
    0.05
}
fn default_delta_ewma_alpha() -> f64 {
    0.3
}
fn default_lock_timeout_s() -> u64 {
    300
}
fn default_metrics_db() -> PathBuf {
    PathBuf::from(wanctl_metrics::DEFAULT_DB_PATH)
}
fn default_retention_days() -> u32 {
    30
}

/// Baseline tracking settings for the steering daemon's own estimator.
#[derive(Debug, Clone, Copy)]
pub struct BaselineSettings {
    pub initial_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub alpha: f64,
}

/// Fully resolved steering configuration.
#[derive(Debug, Clone)]
pub struct SteeringConfig {
    pub wan_name: String,
    pub secondary_wan: String,
    pub router: RouterSection,
    pub queue_download: String,
    pub queue_upload: String,
    pub rule_comment: String,
    pub dry_run: bool,
    pub steer_threshold: u8,
    pub recovery_threshold: u8,
    pub timers: TimerDurations,
    pub sustained_yellow_cycles: u32,
    pub flap: FlapConfig,
    pub thresholds: SteeringThresholds,
    pub red_samples_required: u32,
    pub green_samples_required: u32,
    pub measurement: MeasurementSection,
    pub baseline: BaselineSettings,
    pub delta_ewma_alpha: f64,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub lock_timeout: Duration,
    pub metrics_db: PathBuf,
    pub retention_days: u32,
    pub health_addr: SocketAddr,
}

impl SteeringConfig {
    pub fn load(path: &Path) -> Result<SteeringConfig, ConfigError> {
        let raw: RawConfig = load_yaml(path)?;
        SteeringConfig::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<SteeringConfig, ConfigError> {
        warn_unknown_keys("", &raw.unknown);
        warn_unknown_keys("steering", &raw.steering.unknown);
        warn_unknown_keys("flap", &raw.flap.unknown);
        warn_unknown_keys("thresholds", &raw.thresholds.unknown);

        let mut errors = Vec::new();
        if raw.wan_name.is_empty() {
            errors.push("wan_name must not be empty".into());
        }
        if raw.secondary_wan.is_empty() {
            errors.push("secondary_wan must not be empty".into());
        }
        if raw.steering.rule_comment.is_empty() {
            errors.push("steering.rule_comment must not be empty".into());
        }
        if raw.steering.recovery_threshold >= raw.steering.steer_threshold {
            errors.push("steering.recovery_threshold must be < steer_threshold".into());
        }
        raw.router.validate(&mut errors);
        raw.queues.validate(&mut errors);
        raw.measurement.validate(&mut errors);
        raw.thresholds.validate(&mut errors);
        if raw.baseline_rtt_min >= raw.baseline_rtt_max {
            errors.push("baseline_rtt_min must be < baseline_rtt_max".into());
        }

        let red_samples_required = warn_deprecated(
            "thresholds.bad_samples",
            "thresholds.red_samples_required",
            raw.thresholds.bad_samples,
        )
        .or(raw.thresholds.red_samples_required)
        .unwrap_or(2);
        let green_samples_required = warn_deprecated(
            "thresholds.good_samples",
            "thresholds.green_samples_required",
            raw.thresholds.good_samples,
        )
        .or(raw.thresholds.green_samples_required)
        .unwrap_or(15);

        let health = raw.health.unwrap_or(HealthSection {
            host: "127.0.0.1".into(),
            port: DEFAULT_HEALTH_PORT,
            unknown: BTreeMap::new(),
        });
        warn_unknown_keys("health", &health.unknown);
        let health_addr: SocketAddr = match format!("{}:{}", health.host, health.port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                errors.push(format!("health: invalid bind address: {e}"));
                ([127, 0, 0, 1], DEFAULT_HEALTH_PORT).into()
            }
        };

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors.join("; ")));
        }

        Ok(SteeringConfig {
            wan_name: raw.wan_name,
            secondary_wan: raw.secondary_wan,
            router: raw.router,
            queue_download: raw.queues.download,
            queue_upload: raw.queues.upload,
            rule_comment: raw.steering.rule_comment,
            dry_run: raw.steering.dry_run,
            steer_threshold: raw.steering.steer_threshold,
            recovery_threshold: raw.steering.recovery_threshold,
            timers: TimerDurations {
                sustain_s: raw.steering.sustain_duration_s,
                hold_down_s: raw.steering.hold_down_duration_s,
                recovery_s: raw.steering.recovery_duration_s,
            },
            sustained_yellow_cycles: raw.steering.sustained_yellow_cycles,
            flap: FlapConfig {
                window: Duration::from_secs(raw.flap.window_minutes * 60),
                max_toggles: raw.flap.max_toggles,
                penalty_threshold_add: raw.flap.penalty_threshold_add,
                penalty_duration: Duration::from_secs(raw.flap.penalty_duration_s),
            },
            thresholds: raw.thresholds,
            red_samples_required,
            green_samples_required,
            measurement: raw.measurement,
            baseline: BaselineSettings {
                initial_ms: raw.baseline_rtt_initial,
                min_ms: raw.baseline_rtt_min,
                max_ms: raw.baseline_rtt_max,
                alpha: raw.baseline_alpha,
            },
            delta_ewma_alpha: raw.delta_ewma_alpha,
            state_file: raw.state_file,
            lock_file: raw.lock_file,
            lock_timeout: Duration::from_secs(raw.lock_timeout),
            metrics_db: raw.metrics_db,
            retention_days: raw.retention_days,
            health_addr,
        })
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.measurement.cycle_interval_s)
    }

    /// Curated subset recorded as the config snapshot labels.
    pub fn snapshot_labels(&self) -> serde_json::Value {
        serde_json::json!({
            "primary_wan": self.wan_name,
            "secondary_wan": self.secondary_wan,
            "steer_threshold": self.steer_threshold,
            "recovery_threshold": self.recovery_threshold,
            "green_rtt_ms": self.thresholds.green_rtt_ms,
            "red_rtt_ms": self.thresholds.red_rtt_ms,
            "dry_run": self.dry_run,
            "cycle_interval_s": self.measurement.cycle_interval_s,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> String {
        r#"
wan_name: spectrum
secondary_wan: att
router:
  host: 192.168.88.1
  user: wanctl
  ssh_key: /etc/wanctl/ssh/router.key
queues:
  download: WAN-Download-Spectrum
  upload: WAN-Upload-Spectrum
steering:
  rule_comment: STEER-LATENCY-SENSITIVE
  steer_threshold: 55
  recovery_threshold: 20
  sustain_duration_s: 2
  hold_down_duration_s: 30
  recovery_duration_s: 10
thresholds:
  green_rtt_ms: 5
  yellow_rtt_ms: 15
  red_rtt_ms: 15
  min_drops_red: 1
  min_queue_yellow: 10
  min_queue_red: 50
measurement:
  ping_hosts: ["1.1.1.1", "8.8.8.8"]
  cycle_interval_s: 2.0
baseline_rtt_initial: 20
state_file: /var/lib/wanctl/steering.state.json
lock_file: /run/wanctl/steering.lock
"#
        .to_string()
    }

    fn parse(yaml: &str) -> Result<SteeringConfig, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Invalid(format!("yaml: {e}")))?;
        SteeringConfig::from_raw(raw)
    }

    #[test]
    fn full_config_resolves_with_defaults() {
        let cfg = parse(&base_yaml()).unwrap();
        assert_eq!(cfg.wan_name, "spectrum");
        assert_eq!(cfg.secondary_wan, "att");
        assert_eq!(cfg.timers.hold_down_s, 30.0);
        assert_eq!(cfg.flap.max_toggles, 3);
        assert_eq!(cfg.red_samples_required, 2);
        assert_eq!(cfg.green_samples_required, 15);
        assert!(!cfg.dry_run);
        assert_eq!(cfg.health_addr.port(), DEFAULT_HEALTH_PORT);
    }

    #[test]
    fn legacy_sample_knobs_map_to_new_names() {
        let yaml = base_yaml().replace(
            "  min_queue_red: 50",
            "  min_queue_red: 50\n  bad_samples: 4\n  good_samples: 9",
        );
        let cfg = parse(&yaml).unwrap();
        assert_eq!(cfg.red_samples_required, 4);
        assert_eq!(cfg.green_samples_required, 9);
    }

    #[test]
    fn missing_rule_comment_is_an_error() {
        let yaml = base_yaml().replace("rule_comment: STEER-LATENCY-SENSITIVE", "rule_comment: \"\"");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn recovery_threshold_must_stay_below_steer_threshold() {
        let yaml = base_yaml().replace("recovery_threshold: 20", "recovery_threshold: 60");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn dry_run_parses() {
        let yaml = base_yaml().replace(
            "  rule_comment: STEER-LATENCY-SENSITIVE",
            "  rule_comment: STEER-LATENCY-SENSITIVE\n  dry_run: true",
        );
        let cfg = parse(&yaml).unwrap();
        assert!(cfg.dry_run);
    }

    #[test]
    fn snapshot_labels_carry_topology() {
        let cfg = parse(&base_yaml()).unwrap();
        let labels = cfg.snapshot_labels();
        assert_eq!(labels["primary_wan"], "spectrum");
        assert_eq!(labels["secondary_wan"], "att");
        assert_eq!(labels["steer_threshold"], 55);
    }
}
