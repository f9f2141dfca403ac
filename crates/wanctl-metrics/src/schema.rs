//! Metrics table schema and indexes.

use sqlx::SqliteConnection;

/// Schema DDL; idempotent via IF NOT EXISTS.
pub const METRICS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    wan_name TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    value REAL NOT NULL,
    labels TEXT,
    granularity TEXT DEFAULT 'raw'
);

CREATE INDEX IF NOT EXISTS idx_metrics_timestamp
    ON metrics(timestamp);

CREATE INDEX IF NOT EXISTS idx_metrics_wan_metric_time
    ON metrics(wan_name, metric_name, timestamp);

CREATE INDEX IF NOT EXISTS idx_metrics_granularity_time
    ON metrics(granularity, timestamp);
"#;

/// Create the metrics table and its indexes. Safe to call repeatedly.
pub async fn create_tables(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(METRICS_SCHEMA).execute(conn).await?;
    Ok(())
}
