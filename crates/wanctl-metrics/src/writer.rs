//! Batched metrics writer.
//!
//! One writer per process owns one WAL-mode connection behind a mutex;
//! every per-cycle batch is a single transaction. The handle is created
//! at startup and passed to components explicitly — there is no hidden
//! global to reinitialize.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use tokio::sync::{Mutex, MutexGuard};

use crate::{ensure_parent_dir, schema, MetricRow};

/// Process-wide metrics writer.
pub struct MetricsWriter {
    conn: Mutex<SqliteConnection>,
    db_path: PathBuf,
}

impl MetricsWriter {
    /// Open (creating if needed) the database in WAL mode.
    pub async fn open(db_path: &Path) -> Result<MetricsWriter, sqlx::Error> {
        ensure_parent_dir(db_path).map_err(sqlx::Error::Io)?;

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let mut conn = options.connect().await?;
        schema::create_tables(&mut conn).await?;

        tracing::debug!(db = %db_path.display(), "metrics writer connected (WAL)");

        Ok(MetricsWriter {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    /// Write one metric row in its own transaction.
    pub async fn write_metric(&self, row: MetricRow) -> Result<(), sqlx::Error> {
        self.write_batch(std::slice::from_ref(&row)).await
    }

    /// Write a cycle's batch in a single transaction.
    pub async fn write_batch(&self, rows: &[MetricRow]) -> Result<(), sqlx::Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let mut tx = conn.begin().await?;
        for row in rows {
            let labels = row.labels.as_ref().map(|l| l.to_string());
            sqlx::query(
                "INSERT INTO metrics (timestamp, wan_name, metric_name, value, labels, granularity)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(row.timestamp)
            .bind(&row.wan_name)
            .bind(&row.metric_name)
            .bind(row.value)
            .bind(labels)
            .bind(row.granularity.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Exclusive access to the writer connection, for maintenance.
    pub(crate) async fn lock_conn(&self) -> MutexGuard<'_, SqliteConnection> {
        self.conn.lock().await
    }

    /// Close the connection, checkpointing the WAL.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        let conn = self.conn.into_inner();
        conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{names, Granularity};
    use sqlx::Row;
    use tempfile::TempDir;

    async fn row_count(writer: &MetricsWriter) -> i64 {
        let mut conn = writer.lock_conn().await;
        sqlx::query("SELECT COUNT(*) AS n FROM metrics")
            .fetch_one(&mut *conn)
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn creates_db_and_parent_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/metrics.db");
        let writer = MetricsWriter::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(row_count(&writer).await, 0);
    }

    #[tokio::test]
    async fn batch_write_inserts_all_rows() {
        let dir = TempDir::new().unwrap();
        let writer = MetricsWriter::open(&dir.path().join("m.db")).await.unwrap();

        let ts = 1_700_000_000;
        let batch = vec![
            MetricRow::raw(ts, "spectrum", names::RTT_MS, 21.5),
            MetricRow::raw(ts, "spectrum", names::RTT_BASELINE_MS, 18.0),
            MetricRow::raw(ts, "spectrum", names::STATE, 0.0),
        ];
        writer.write_batch(&batch).await.unwrap();
        assert_eq!(row_count(&writer).await, 3);
    }

    #[tokio::test]
    async fn labels_persist_as_json() {
        let dir = TempDir::new().unwrap();
        let writer = MetricsWriter::open(&dir.path().join("m.db")).await.unwrap();

        let row = MetricRow {
            timestamp: 1_700_000_000,
            wan_name: "spectrum".into(),
            metric_name: names::STEERING_TRANSITION.into(),
            value: 1.0,
            labels: Some(serde_json::json!({"from": "PRIMARY_GOOD", "to": "PRIMARY_DEGRADED"})),
            granularity: Granularity::Raw,
        };
        writer.write_metric(row).await.unwrap();

        let mut conn = writer.lock_conn().await;
        let stored: String = sqlx::query("SELECT labels FROM metrics")
            .fetch_one(&mut *conn)
            .await
            .unwrap()
            .get("labels");
        let parsed: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed["to"], "PRIMARY_DEGRADED");
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let writer = MetricsWriter::open(&dir.path().join("m.db")).await.unwrap();
        writer.write_batch(&[]).await.unwrap();
        assert_eq!(row_count(&writer).await, 0);
    }
}
