//! Embedded time-series metrics store.
//!
//! A single-file SQLite database shared by both daemons. One writer per
//! process serializes batched inserts behind a mutex; readers open
//! separate read-only connections and never block the writer (WAL).
//! Startup maintenance keeps the file bounded: retention cleanup,
//! VACUUM past a deletion threshold, and granularity downsampling.

pub mod downsample;
pub mod maintenance;
pub mod names;
pub mod reader;
pub mod schema;
pub mod snapshot;
pub mod writer;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use reader::{MetricsQuery, Summary};
pub use writer::MetricsWriter;

/// Default database location; the parent directory is created if absent.
pub const DEFAULT_DB_PATH: &str = "/var/lib/wanctl/metrics.db";

/// Storage granularity of a metric row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Raw,
    OneMinute,
    FiveMinutes,
    OneHour,
}

impl Granularity {
    /// The TEXT stored in the `granularity` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Raw => "raw",
            Granularity::OneMinute => "1m",
            Granularity::FiveMinutes => "5m",
            Granularity::OneHour => "1h",
        }
    }

    pub fn parse(s: &str) -> Option<Granularity> {
        match s {
            "raw" => Some(Granularity::Raw),
            "1m" => Some(Granularity::OneMinute),
            "5m" => Some(Granularity::FiveMinutes),
            "1h" => Some(Granularity::OneHour),
            _ => None,
        }
    }
}

/// One metric sample as stored and as queried.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    /// Unix seconds; batched rows of one cycle share this value.
    pub timestamp: i64,
    pub wan_name: String,
    pub metric_name: String,
    pub value: f64,
    pub labels: Option<serde_json::Value>,
    pub granularity: Granularity,
}

impl MetricRow {
    /// Raw-granularity row without labels — the common case on the
    /// per-cycle write path.
    pub fn raw(timestamp: i64, wan_name: &str, metric_name: &str, value: f64) -> MetricRow {
        MetricRow {
            timestamp,
            wan_name: wan_name.to_string(),
            metric_name: metric_name.to_string(),
            value,
            labels: None,
            granularity: Granularity::Raw,
        }
    }
}

/// Create the parent directory of a database path if needed.
pub(crate) fn ensure_parent_dir(db_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_round_trips() {
        for g in [
            Granularity::Raw,
            Granularity::OneMinute,
            Granularity::FiveMinutes,
            Granularity::OneHour,
        ] {
            assert_eq!(Granularity::parse(g.as_str()), Some(g));
        }
        assert_eq!(Granularity::parse("2m"), None);
    }
}
