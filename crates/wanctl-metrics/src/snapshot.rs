//! Configuration snapshots.
//!
//! A curated subset of the live config is recorded at startup and on
//! reload so historical behavior can be read against the settings that
//! produced it. The row's value is its own timestamp for easy ordering.

use crate::{names, Granularity, MetricRow, MetricsWriter};

/// What caused the snapshot to be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTrigger {
    Startup,
    Reload,
    Manual,
}

impl SnapshotTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotTrigger::Startup => "startup",
            SnapshotTrigger::Reload => "reload",
            SnapshotTrigger::Manual => "manual",
        }
    }
}

/// Record a config snapshot row.
///
/// `config_labels` is the caller-curated subset (ceilings, thresholds,
/// topology — never secrets); the trigger is merged in.
pub async fn record_config_snapshot(
    writer: &MetricsWriter,
    wan_name: &str,
    mut config_labels: serde_json::Value,
    trigger: SnapshotTrigger,
) -> Result<(), sqlx::Error> {
    let ts = chrono::Utc::now().timestamp();

    if let Some(map) = config_labels.as_object_mut() {
        map.insert("trigger".into(), trigger.as_str().into());
    } else {
        config_labels = serde_json::json!({ "trigger": trigger.as_str() });
    }

    writer
        .write_metric(MetricRow {
            timestamp: ts,
            wan_name: wan_name.to_string(),
            metric_name: names::CONFIG_SNAPSHOT.to_string(),
            value: ts as f64,
            labels: Some(config_labels),
            granularity: Granularity::Raw,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricsQuery;
    use tempfile::TempDir;

    #[tokio::test]
    async fn snapshot_carries_trigger_and_labels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.db");
        let writer = MetricsWriter::open(&path).await.unwrap();

        record_config_snapshot(
            &writer,
            "spectrum",
            serde_json::json!({
                "download_ceiling_mbps": 940.0,
                "target_bloat_ms": 15.0,
            }),
            SnapshotTrigger::Startup,
        )
        .await
        .unwrap();

        let rows = crate::reader::query_metrics(
            &path,
            &MetricsQuery {
                metric_names: vec![names::CONFIG_SNAPSHOT.into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        let labels = rows[0].labels.as_ref().unwrap();
        assert_eq!(labels["trigger"], "startup");
        assert_eq!(labels["download_ceiling_mbps"], 940.0);
        assert_eq!(rows[0].value, rows[0].timestamp as f64);
    }
}
