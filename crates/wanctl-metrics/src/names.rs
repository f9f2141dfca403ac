//! Fixed metric names.
//!
//! Prometheus-compatible; nothing else may be written to the store so
//! dashboards and the downsampler can rely on the set.

/// Current RTT measurement in milliseconds.
pub const RTT_MS: &str = "wanctl_rtt_ms";
/// Baseline RTT in milliseconds (frozen during load).
pub const RTT_BASELINE_MS: &str = "wanctl_rtt_baseline_ms";
/// RTT delta from baseline in milliseconds.
pub const RTT_DELTA_MS: &str = "wanctl_rtt_delta_ms";
/// Current download rate limit in Mbps.
pub const RATE_DOWNLOAD_MBPS: &str = "wanctl_rate_download_mbps";
/// Current upload rate limit in Mbps.
pub const RATE_UPLOAD_MBPS: &str = "wanctl_rate_upload_mbps";
/// Congestion state (0=GREEN, 1=YELLOW, 2=SOFT_RED, 3=RED).
pub const STATE: &str = "wanctl_state";
/// Steering active status (0=disabled, 1=enabled).
pub const STEERING_ENABLED: &str = "wanctl_steering_enabled";
/// Steering FSM transition event (value 1, labels carry from/to).
pub const STEERING_TRANSITION: &str = "wanctl_steering_transition";
/// Configuration snapshot (value is the snapshot timestamp).
pub const CONFIG_SNAPSHOT: &str = "wanctl_config_snapshot";

/// State-like metrics that downsample with MODE instead of AVG —
/// averaging an enum encoding is meaningless.
pub const MODE_AGGREGATED: [&str; 2] = [STATE, STEERING_ENABLED];

/// Whether a metric downsamples with MODE.
pub fn uses_mode_aggregation(metric_name: &str) -> bool {
    MODE_AGGREGATED.contains(&metric_name)
}
