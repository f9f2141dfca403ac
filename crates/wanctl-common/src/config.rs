//! YAML configuration substrate.
//!
//! Each daemon owns its full config schema; the sections every config
//! shares (router access, measurement loop, state/lock paths) and the
//! loading conventions live here:
//!
//! - unknown keys are ignored but warned about once per load,
//! - deprecated keys are accepted with a single deprecation warning and
//!   mapped 1:1 onto their replacements,
//! - rates are configured in Mbps and converted to bps internally.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Configuration loading / validation failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config validation failed: {0}")]
    Invalid(String),
}

/// Convert a configured Mbps value to the bps the router speaks.
pub fn mbps_to_bps(mbps: f64) -> u64 {
    (mbps * 1_000_000.0).round() as u64
}

/// Convert bps back to Mbps for display and metrics.
pub fn bps_to_mbps(bps: u64) -> f64 {
    bps as f64 / 1_000_000.0
}

/// Router access section (`router:`).
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    pub host: String,
    pub user: String,
    pub ssh_key: PathBuf,
    /// Backend selector; only `routeros` is implemented.
    #[serde(rename = "type")]
    pub backend_type: Option<String>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

impl RouterSection {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.host.is_empty() {
            errors.push("router.host must not be empty".into());
        }
        if self.user.is_empty() {
            errors.push("router.user must not be empty".into());
        }
        if let Some(t) = &self.backend_type {
            if t != "routeros" {
                tracing::warn!(backend = %t, "unsupported router.type, using routeros");
            }
        }
        warn_unknown_keys("router", &self.unknown);
    }
}

/// Shaper queue names (`queues:`).
#[derive(Debug, Clone, Deserialize)]
pub struct QueuesSection {
    pub download: String,
    pub upload: String,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

impl QueuesSection {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.download.is_empty() {
            errors.push("queues.download must not be empty".into());
        }
        if self.upload.is_empty() {
            errors.push("queues.upload must not be empty".into());
        }
        warn_unknown_keys("queues", &self.unknown);
    }
}

fn default_ping_timeout_s() -> f64 {
    1.0
}

fn default_cycle_interval_s() -> f64 {
    2.0
}

/// Measurement loop section (`measurement:`).
#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementSection {
    pub ping_hosts: Vec<String>,
    #[serde(default = "default_ping_timeout_s")]
    pub ping_timeout_s: f64,
    #[serde(default = "default_cycle_interval_s")]
    pub cycle_interval_s: f64,
    /// How long a stale RTT may be replayed after total measurement
    /// failure. Defaults to three cycles.
    #[serde(default)]
    pub fallback_max_age_s: Option<f64>,
    /// Hosts for the TCP connect-time fallback, `host:port` form.
    #[serde(default)]
    pub tcp_fallback_hosts: Vec<String>,
    /// How per-host RTTs collapse into one sample.
    #[serde(default)]
    pub rtt_aggregation: crate::probe::Aggregation,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

impl MeasurementSection {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.ping_hosts.is_empty() {
            errors.push("measurement.ping_hosts must list at least one anchor host".into());
        }
        if self.cycle_interval_s <= 0.0 {
            errors.push("measurement.cycle_interval_s must be positive".into());
        }
        if self.ping_timeout_s <= 0.0 {
            errors.push("measurement.ping_timeout_s must be positive".into());
        }
        warn_unknown_keys("measurement", &self.unknown);
    }

    /// Effective fallback window (configured, or 3x the cycle interval).
    pub fn fallback_max_age_s(&self) -> f64 {
        self.fallback_max_age_s
            .unwrap_or(3.0 * self.cycle_interval_s)
    }
}

/// Health endpoint bind section (`health:`).
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_health_host")]
    pub host: String,
    pub port: u16,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

fn default_health_host() -> String {
    "127.0.0.1".into()
}

/// Log a single warning for every unrecognized key in a section.
pub fn warn_unknown_keys(section: &str, unknown: &BTreeMap<String, serde_yaml::Value>) {
    for key in unknown.keys() {
        tracing::warn!(section, key = %key, "ignoring unknown config key");
    }
}

/// Log a single deprecation warning and return the legacy value.
///
/// Call once per legacy key per load; the value is handed back so the
/// caller can map it onto the replacement key unchanged.
pub fn warn_deprecated<T: Copy>(legacy: &str, replacement: &str, value: Option<T>) -> Option<T> {
    if value.is_some() {
        tracing::warn!(
            legacy_key = legacy,
            replacement,
            "config key is deprecated, mapping to its replacement"
        );
    }
    value
}

/// Read and parse a YAML config file into any `Deserialize` schema.
pub fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Probe {
        measurement: MeasurementSection,
    }

    #[test]
    fn measurement_defaults_apply() {
        let cfg: Probe = serde_yaml::from_str(
            r#"
measurement:
  ping_hosts: ["1.1.1.1", "8.8.8.8"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.measurement.ping_timeout_s, 1.0);
        assert_eq!(cfg.measurement.cycle_interval_s, 2.0);
        assert_eq!(cfg.measurement.fallback_max_age_s(), 6.0);
    }

    #[test]
    fn fallback_window_is_configurable() {
        let cfg: Probe = serde_yaml::from_str(
            r#"
measurement:
  ping_hosts: ["1.1.1.1"]
  cycle_interval_s: 0.5
  fallback_max_age_s: 10.0
"#,
        )
        .unwrap();
        assert_eq!(cfg.measurement.fallback_max_age_s(), 10.0);
    }

    #[test]
    fn unknown_keys_are_captured_not_fatal() {
        let cfg: Probe = serde_yaml::from_str(
            r#"
measurement:
  ping_hosts: ["1.1.1.1"]
  ping_burst: 5
"#,
        )
        .unwrap();
        assert!(cfg.measurement.unknown.contains_key("ping_burst"));
    }

    #[test]
    fn empty_ping_hosts_fail_validation() {
        let cfg: Probe = serde_yaml::from_str("measurement:\n  ping_hosts: []\n").unwrap();
        let mut errors = Vec::new();
        cfg.measurement.validate(&mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn mbps_conversion_round_trips() {
        assert_eq!(mbps_to_bps(940.0), 940_000_000);
        assert!((bps_to_mbps(35_000_000) - 35.0).abs() < 1e-9);
    }
}
