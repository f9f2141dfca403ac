//! Autorate daemon configuration.
//!
//! One YAML file per WAN. Rates are configured in Mbps, state floors
//! are per-zone with the legacy single `floor_mbps` accepted as the
//! fallback for all of them. Unknown keys warn; deprecated keys warn
//! once and map onto their replacements.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use wanctl_common::config::{
    load_yaml, mbps_to_bps, warn_deprecated, warn_unknown_keys, ConfigError, HealthSection,
    MeasurementSection, QueuesSection, RouterSection,
};

use crate::classify::BloatThresholds;
use crate::controller::DirectionSettings;

/// Default bind for the autorate health endpoint.
pub const DEFAULT_HEALTH_PORT: u16 = 9101;

#[derive(Debug, Deserialize)]
struct RawConfig {
    wan_name: String,
    router: RouterSection,
    queues: QueuesSection,
    autorate: RawAutorate,
    thresholds: RawThresholds,
    measurement: MeasurementSection,
    baseline_rtt_initial: f64,
    #[serde(default = "default_baseline_min")]
    baseline_rtt_min: f64,
    #[serde(default = "default_baseline_max")]
    baseline_rtt_max: f64,
    #[serde(default = "default_baseline_alpha")]
    baseline_alpha: f64,
    #[serde(default = "default_load_rtt_beta")]
    load_rtt_beta: f64,
    #[serde(default)]
    rate_limit: RawRateLimit,
    #[serde(default = "default_pending_max_age_s")]
    pending_max_age_s: f64,
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
struct RawAutorate {
    download: RawDirection,
    upload: RawDirection,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawDirection {
    /// Deprecated single floor, fallback for all state floors.
    floor_mbps: Option<f64>,
    floor_green_mbps: Option<f64>,
    floor_yellow_mbps: Option<f64>,
    floor_soft_red_mbps: Option<f64>,
    floor_red_mbps: Option<f64>,
    ceiling_mbps: f64,
    step_up_mbps: f64,
    factor_down: f64,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawThresholds {
    target_bloat_ms: f64,
    warn_bloat_ms: f64,
    hard_red_bloat_ms: f64,
    green_samples_required: Option<u32>,
    /// Deprecated name for green_samples_required.
    good_samples: Option<u32>,
    #[serde(default = "default_soft_red_samples")]
    soft_red_samples_required: u32,
    #[serde(default = "default_baseline_update_threshold_ms")]
    baseline_update_threshold_ms: f64,
    #[serde(default = "default_idle_queue_packets_max")]
    idle_queue_packets_max: u64,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    max_changes: usize,
    window_seconds: u64,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for RawRateLimit {
    fn default() -> Self {
        RawRateLimit {
            max_changes: 10,
            window_seconds: 60,
            unknown: BTreeMap::new(),
        }
    }
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
fn default_load_rtt_beta() -> f64 {
    0.3
}
fn default_soft_red_samples() -> u32 {
    3
}
fn default_green_samples() -> u32 {
    15
}
fn default_baseline_update_threshold_ms() -> f64 {
    3.0
}
fn default_idle_queue_packets_max() -> u64 {
    5
}
fn default_pending_max_age_s() -> f64 {
    60.0
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

/// Baseline estimator settings.
#[derive(Debug, Clone, Copy)]
pub struct BaselineSettings {
    pub initial_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub alpha: f64,
    pub update_threshold_ms: f64,
    pub idle_queue_packets_max: u64,
}

/// Rate limiter settings.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub max_changes: usize,
    pub window: Duration,
}

/// Fully resolved and validated autorate configuration.
#[derive(Debug, Clone)]
pub struct AutorateConfig {
    pub wan_name: String,
    pub router: RouterSection,
    pub queue_download: String,
    pub queue_upload: String,
    pub download: DirectionSettings,
    pub upload: DirectionSettings,
    pub thresholds: BloatThresholds,
    pub baseline: BaselineSettings,
    pub load_rtt_beta: f64,
    pub measurement: MeasurementSection,
    pub rate_limit: RateLimitSettings,
    pub pending_max_age: Duration,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub lock_timeout: Duration,
    pub metrics_db: PathBuf,
    pub retention_days: u32,
    pub health_addr: SocketAddr,
}

impl AutorateConfig {
    /// Load and validate a per-WAN config file.
    pub fn load(path: &Path) -> Result<AutorateConfig, ConfigError> {
        let raw: RawConfig = load_yaml(path)?;
        AutorateConfig::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<AutorateConfig, ConfigError> {
        warn_unknown_keys("", &raw.unknown);
        warn_unknown_keys("autorate", &raw.autorate.unknown);
        warn_unknown_keys("thresholds", &raw.thresholds.unknown);
        warn_unknown_keys("rate_limit", &raw.rate_limit.unknown);

        let mut errors = Vec::new();
        if raw.wan_name.is_empty() {
            errors.push("wan_name must not be empty".into());
        }
        raw.router.validate(&mut errors);
        raw.queues.validate(&mut errors);
        raw.measurement.validate(&mut errors);

        let green_required = warn_deprecated(
            "thresholds.good_samples",
            "thresholds.green_samples_required",
            raw.thresholds.good_samples,
        )
        .or(raw.thresholds.green_samples_required)
        .unwrap_or_else(default_green_samples);

        let thresholds = BloatThresholds {
            target_ms: raw.thresholds.target_bloat_ms,
            warn_ms: raw.thresholds.warn_bloat_ms,
            hard_red_ms: raw.thresholds.hard_red_bloat_ms,
        };
        thresholds.validate(&mut errors);

        let download = resolve_direction(
            "autorate.download",
            &raw.autorate.download,
            green_required,
            raw.thresholds.soft_red_samples_required,
            &mut errors,
        );
        let upload = resolve_direction(
            "autorate.upload",
            &raw.autorate.upload,
            green_required,
            raw.thresholds.soft_red_samples_required,
            &mut errors,
        );

        if raw.baseline_rtt_min >= raw.baseline_rtt_max {
            errors.push("baseline_rtt_min must be < baseline_rtt_max".into());
        }
        if !(0.0..1.0).contains(&raw.baseline_alpha) || raw.baseline_alpha <= 0.0 {
            errors.push("baseline_alpha must be in (0, 1)".into());
        }

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

        Ok(AutorateConfig {
            wan_name: raw.wan_name,
            router: raw.router,
            queue_download: raw.queues.download,
            queue_upload: raw.queues.upload,
            download,
            upload,
            thresholds,
            baseline: BaselineSettings {
                initial_ms: raw.baseline_rtt_initial,
                min_ms: raw.baseline_rtt_min,
                max_ms: raw.baseline_rtt_max,
                alpha: raw.baseline_alpha,
                update_threshold_ms: raw.thresholds.baseline_update_threshold_ms,
                idle_queue_packets_max: raw.thresholds.idle_queue_packets_max,
            },
            load_rtt_beta: raw.load_rtt_beta,
            measurement: raw.measurement,
            rate_limit: RateLimitSettings {
                max_changes: raw.rate_limit.max_changes,
                window: Duration::from_secs(raw.rate_limit.window_seconds),
            },
            pending_max_age: Duration::from_secs_f64(raw.pending_max_age_s),
            state_file: raw.state_file,
            lock_file: raw.lock_file,
            lock_timeout: Duration::from_secs(raw.lock_timeout),
            metrics_db: raw.metrics_db,
            retention_days: raw.retention_days,
            health_addr,
        })
    }

    /// Cycle period as a duration.
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.measurement.cycle_interval_s)
    }

    /// Curated subset recorded as the config snapshot labels.
    pub fn snapshot_labels(&self) -> serde_json::Value {
        serde_json::json!({
            "baseline_rtt_initial": self.baseline.initial_ms,
            "download_ceiling_mbps": self.download.ceiling_bps as f64 / 1e6,
            "upload_ceiling_mbps": self.upload.ceiling_bps as f64 / 1e6,
            "target_bloat_ms": self.thresholds.target_ms,
            "warn_bloat_ms": self.thresholds.warn_ms,
            "cycle_interval_s": self.measurement.cycle_interval_s,
        })
    }
}

fn resolve_direction(
    section: &str,
    raw: &RawDirection,
    green_required: u32,
    soft_red_required: u32,
    errors: &mut Vec<String>,
) -> DirectionSettings {
    warn_unknown_keys(section, &raw.unknown);

    let legacy = warn_deprecated(
        &format!("{section}.floor_mbps"),
        "state-based floors",
        raw.floor_mbps,
    );
    let mut floor = |specific: Option<f64>, name: &str| -> u64 {
        match specific.or(legacy) {
            Some(mbps) => mbps_to_bps(mbps),
            None => {
                errors.push(format!("{section}: missing {name} (and no floor_mbps fallback)"));
                0
            }
        }
    };

    let floor_green_bps = floor(raw.floor_green_mbps, "floor_green_mbps");
    let floor_yellow_bps = floor(raw.floor_yellow_mbps, "floor_yellow_mbps");
    let floor_red_bps = floor(raw.floor_red_mbps, "floor_red_mbps");
    // The soft-red floor defaults to the red floor when unspecified.
    let floor_soft_red_bps = raw
        .floor_soft_red_mbps
        .map(mbps_to_bps)
        .unwrap_or(floor_red_bps);

    let settings = DirectionSettings {
        floor_green_bps,
        floor_yellow_bps,
        floor_soft_red_bps,
        floor_red_bps,
        ceiling_bps: mbps_to_bps(raw.ceiling_mbps),
        step_up_bps: mbps_to_bps(raw.step_up_mbps),
        factor_down: raw.factor_down,
        green_required,
        soft_red_required,
    };
    settings.validate(section, errors);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_yaml() -> String {
        r#"
wan_name: spectrum
router:
  host: 192.168.88.1
  user: wanctl
  ssh_key: /etc/wanctl/ssh/router.key
queues:
  download: WAN-Download-Spectrum
  upload: WAN-Upload-Spectrum
autorate:
  download:
    floor_green_mbps: 500
    floor_yellow_mbps: 450
    floor_soft_red_mbps: 350
    floor_red_mbps: 300
    ceiling_mbps: 940
    step_up_mbps: 10
    factor_down: 0.85
  upload:
    floor_mbps: 20
    ceiling_mbps: 40
    step_up_mbps: 1
    factor_down: 0.85
thresholds:
  target_bloat_ms: 5
  warn_bloat_ms: 15
  hard_red_bloat_ms: 40
  green_samples_required: 15
measurement:
  ping_hosts: ["1.1.1.1", "8.8.8.8", "9.9.9.9"]
  ping_timeout_s: 1.0
  cycle_interval_s: 2.0
baseline_rtt_initial: 20
state_file: /var/lib/wanctl/spectrum.state.json
lock_file: /run/wanctl/autorate-spectrum.lock
lock_timeout: 300
"#
        .to_string()
    }

    fn parse(yaml: &str) -> Result<AutorateConfig, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::Invalid(format!("yaml: {e}"))
        })?;
        AutorateConfig::from_raw(raw)
    }

    #[test]
    fn full_config_resolves() {
        let cfg = parse(&base_yaml()).unwrap();
        assert_eq!(cfg.wan_name, "spectrum");
        assert_eq!(cfg.download.floor_green_bps, 500_000_000);
        assert_eq!(cfg.download.floor_soft_red_bps, 350_000_000);
        assert_eq!(cfg.download.ceiling_bps, 940_000_000);
        assert_eq!(cfg.download.green_required, 15);
        assert_eq!(cfg.baseline.min_ms, 10.0);
        assert_eq!(cfg.baseline.max_ms, 60.0);
        assert_eq!(cfg.rate_limit.max_changes, 10);
        assert_eq!(cfg.health_addr.port(), DEFAULT_HEALTH_PORT);
    }

    #[test]
    fn legacy_floor_mbps_covers_all_states() {
        let cfg = parse(&base_yaml()).unwrap();
        assert_eq!(cfg.upload.floor_green_bps, 20_000_000);
        assert_eq!(cfg.upload.floor_yellow_bps, 20_000_000);
        assert_eq!(cfg.upload.floor_soft_red_bps, 20_000_000);
        assert_eq!(cfg.upload.floor_red_bps, 20_000_000);
    }

    #[test]
    fn legacy_good_samples_maps_to_green_required() {
        let yaml = base_yaml().replace(
            "green_samples_required: 15",
            "good_samples: 9",
        );
        let cfg = parse(&yaml).unwrap();
        assert_eq!(cfg.download.green_required, 9);
    }

    #[test]
    fn missing_floor_everywhere_is_an_error() {
        let yaml = base_yaml().replace("floor_mbps: 20\n", "");
        let err = parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("floor"));
    }

    #[test]
    fn inverted_bloat_thresholds_are_an_error() {
        let yaml = base_yaml().replace("warn_bloat_ms: 15", "warn_bloat_ms: 50");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn bad_factor_down_is_an_error() {
        let yaml = base_yaml().replace("factor_down: 0.85", "factor_down: 1.3");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn snapshot_labels_are_curated() {
        let cfg = parse(&base_yaml()).unwrap();
        let labels = cfg.snapshot_labels();
        assert_eq!(labels["download_ceiling_mbps"], 940.0);
        assert_eq!(labels["target_bloat_ms"], 5.0);
        assert!(labels.get("ssh_key").is_none(), "secrets never land in labels");
    }

    #[test]
    fn soft_red_floor_defaults_to_red_floor() {
        let yaml = base_yaml().replace("    floor_soft_red_mbps: 350\n", "");
        let cfg = parse(&yaml).unwrap();
        assert_eq!(cfg.download.floor_soft_red_bps, cfg.download.floor_red_bps);
    }
}
