//! Read-only query layer.
//!
//! Every query opens its own read-only connection so dashboards and CLI
//! tools never contend with the writer. A missing database is an empty
//! result, not an error.

use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Row};

use crate::{Granularity, MetricRow};

/// Filter set for [`query_metrics`]; all fields optional.
#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub metric_names: Vec<String>,
    pub wan: Option<String>,
    pub granularity: Option<Granularity>,
}

/// Query metrics with optional filters, newest first.
pub async fn query_metrics(
    db_path: &Path,
    query: &MetricsQuery,
) -> Result<Vec<MetricRow>, sqlx::Error> {
    if !db_path.exists() {
        tracing::debug!(db = %db_path.display(), "metrics database not found");
        return Ok(Vec::new());
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true);
    let mut conn = options.connect().await?;

    let mut sql = String::from(
        "SELECT timestamp, wan_name, metric_name, value, labels, granularity
         FROM metrics WHERE 1=1",
    );
    if query.start_ts.is_some() {
        sql.push_str(" AND timestamp >= ?");
    }
    if query.end_ts.is_some() {
        sql.push_str(" AND timestamp <= ?");
    }
    if !query.metric_names.is_empty() {
        let placeholders = vec!["?"; query.metric_names.len()].join(",");
        sql.push_str(&format!(" AND metric_name IN ({placeholders})"));
    }
    if query.wan.is_some() {
        sql.push_str(" AND wan_name = ?");
    }
    if query.granularity.is_some() {
        sql.push_str(" AND granularity = ?");
    }
    sql.push_str(" ORDER BY timestamp DESC");

    let mut q = sqlx::query(&sql);
    if let Some(start) = query.start_ts {
        q = q.bind(start);
    }
    if let Some(end) = query.end_ts {
        q = q.bind(end);
    }
    for name in &query.metric_names {
        q = q.bind(name);
    }
    if let Some(wan) = &query.wan {
        q = q.bind(wan);
    }
    if let Some(granularity) = query.granularity {
        q = q.bind(granularity.as_str());
    }

    let rows = q.fetch_all(&mut conn).await?;
    Ok(rows
        .into_iter()
        .map(|row| MetricRow {
            timestamp: row.get("timestamp"),
            wan_name: row.get("wan_name"),
            metric_name: row.get("metric_name"),
            value: row.get("value"),
            labels: row
                .get::<Option<String>, _>("labels")
                .and_then(|text| serde_json::from_str(&text).ok()),
            granularity: Granularity::parse(row.get::<String, _>("granularity").as_str())
                .unwrap_or(Granularity::Raw),
        })
        .collect())
}

/// Pick the granularity best suited to a query window.
pub fn select_granularity(start_ts: i64, end_ts: i64) -> Granularity {
    const SIX_HOURS: i64 = 6 * 60 * 60;
    const ONE_DAY: i64 = 24 * 60 * 60;
    const SEVEN_DAYS: i64 = 7 * 24 * 60 * 60;

    let duration = end_ts - start_ts;
    if duration < SIX_HOURS {
        Granularity::Raw
    } else if duration < ONE_DAY {
        Granularity::OneMinute
    } else if duration < SEVEN_DAYS {
        Granularity::FiveMinutes
    } else {
        Granularity::OneHour
    }
}

/// Summary statistics over a value list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Compute min/max/avg and interpolated percentiles.
///
/// Quantiles use the exclusive linear-interpolation method; a single
/// value collapses every statistic to itself. Empty input yields None.
pub fn compute_summary(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    if values.len() == 1 {
        let v = values[0];
        return Some(Summary {
            min: v,
            max: v,
            avg: v,
            p50: v,
            p95: v,
            p99: v,
        });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some(Summary {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        avg,
        p50: quantile_exclusive(&sorted, 0.50),
        p95: quantile_exclusive(&sorted, 0.95),
        p99: quantile_exclusive(&sorted, 0.99),
    })
}

/// Exclusive-method quantile with linear interpolation.
///
/// Position `h = p * (n + 1)` over the 1-indexed sorted data; clamped to
/// the extremes when it falls outside.
fn quantile_exclusive(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let h = p * (n as f64 + 1.0);
    if h <= 1.0 {
        return sorted[0];
    }
    if h >= n as f64 {
        return sorted[n - 1];
    }
    let j = h.floor() as usize;
    let g = h - j as f64;
    sorted[j - 1] + g * (sorted[j] - sorted[j - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{names, MetricsWriter};
    use tempfile::TempDir;

    #[test]
    fn granularity_selection_boundaries() {
        assert_eq!(select_granularity(0, 5 * 3600), Granularity::Raw);
        assert_eq!(select_granularity(0, 6 * 3600), Granularity::OneMinute);
        assert_eq!(select_granularity(0, 23 * 3600), Granularity::OneMinute);
        assert_eq!(select_granularity(0, 24 * 3600), Granularity::FiveMinutes);
        assert_eq!(select_granularity(0, 6 * 86400), Granularity::FiveMinutes);
        assert_eq!(select_granularity(0, 7 * 86400), Granularity::OneHour);
        assert_eq!(select_granularity(0, 30 * 86400), Granularity::OneHour);
    }

    #[test]
    fn summary_of_empty_is_none() {
        assert!(compute_summary(&[]).is_none());
    }

    #[test]
    fn summary_of_one_collapses() {
        let s = compute_summary(&[42.0]).unwrap();
        assert_eq!(s.min, 42.0);
        assert_eq!(s.max, 42.0);
        assert_eq!(s.p50, 42.0);
        assert_eq!(s.p99, 42.0);
    }

    #[test]
    fn summary_interpolates_percentiles() {
        // 1..=100: exclusive p50 = 50.5, p95 = 95.95, p99 hits the tail.
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let s = compute_summary(&values).unwrap();
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 100.0);
        assert!((s.avg - 50.5).abs() < 1e-9);
        assert!((s.p50 - 50.5).abs() < 1e-9);
        assert!((s.p95 - 95.95).abs() < 1e-9);
        assert!((s.p99 - 99.99).abs() < 1e-9);
    }

    #[test]
    fn summary_is_order_independent() {
        let a = compute_summary(&[3.0, 1.0, 2.0]).unwrap();
        let b = compute_summary(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.p50, 2.0);
    }

    #[tokio::test]
    async fn missing_db_yields_empty() {
        let rows = query_metrics(Path::new("/nonexistent/metrics.db"), &MetricsQuery::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn filters_and_ordering_apply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.db");
        let writer = MetricsWriter::open(&path).await.unwrap();
        writer
            .write_batch(&[
                MetricRow::raw(100, "spectrum", names::RTT_MS, 20.0),
                MetricRow::raw(200, "spectrum", names::RTT_MS, 21.0),
                MetricRow::raw(300, "att", names::RTT_MS, 30.0),
                MetricRow::raw(200, "spectrum", names::STATE, 0.0),
            ])
            .await
            .unwrap();

        let rows = query_metrics(
            &path,
            &MetricsQuery {
                wan: Some("spectrum".into()),
                metric_names: vec![names::RTT_MS.into()],
                start_ts: Some(100),
                end_ts: Some(300),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 2);
        // Newest first.
        assert_eq!(rows[0].timestamp, 200);
        assert_eq!(rows[1].timestamp, 100);
    }
}
