//! Startup maintenance: retention cleanup, VACUUM, downsampling.
//!
//! Runs once at daemon startup. Failures are logged and reported back,
//! never raised — metrics are off the critical path and the daemon must
//! start regardless.

use sqlx::SqliteConnection;

use crate::downsample::downsample_metrics;
use crate::writer::MetricsWriter;

/// Default retention for the coarsest data.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Deleting at least this many rows triggers a VACUUM to return the
/// space to the filesystem.
pub const VACUUM_THRESHOLD_ROWS: u64 = 10_000;

/// What startup maintenance did.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub cleanup_deleted: u64,
    pub vacuumed: bool,
    pub downsampled: Vec<(String, u64)>,
    pub error: Option<String>,
}

/// Delete rows older than the retention window. Returns rows deleted.
pub async fn cleanup_old_metrics(
    conn: &mut SqliteConnection,
    retention_days: u32,
    now: i64,
) -> Result<u64, sqlx::Error> {
    let cutoff = now - i64::from(retention_days) * 86_400;
    let result = sqlx::query("DELETE FROM metrics WHERE timestamp < ?")
        .bind(cutoff)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// VACUUM when the cleanup removed enough rows to matter.
pub async fn vacuum_if_needed(
    conn: &mut SqliteConnection,
    deleted: u64,
) -> Result<bool, sqlx::Error> {
    if deleted < VACUUM_THRESHOLD_ROWS {
        return Ok(false);
    }
    tracing::info!(deleted, "running VACUUM after large cleanup");
    sqlx::query("VACUUM").execute(conn).await?;
    Ok(true)
}

/// Run the full maintenance pass against the writer's connection.
pub async fn run_startup_maintenance(
    writer: &MetricsWriter,
    retention_days: u32,
) -> MaintenanceReport {
    let now = chrono::Utc::now().timestamp();
    run_startup_maintenance_at(writer, retention_days, now).await
}

/// Maintenance with an explicit clock, for tests and replay tooling.
pub async fn run_startup_maintenance_at(
    writer: &MetricsWriter,
    retention_days: u32,
    now: i64,
) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();
    let mut conn = writer.lock_conn().await;

    let outcome: Result<(), sqlx::Error> = async {
        report.cleanup_deleted = cleanup_old_metrics(&mut conn, retention_days, now).await?;
        report.vacuumed = vacuum_if_needed(&mut conn, report.cleanup_deleted).await?;
        report.downsampled = downsample_metrics(&mut conn, now).await?;
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        report.error = Some(e.to_string());
        tracing::error!(error = %e, "startup maintenance failed");
        return report;
    }

    let total_downsampled: u64 = report.downsampled.iter().map(|(_, n)| n).sum();
    if report.cleanup_deleted > 0 || total_downsampled > 0 {
        tracing::info!(
            deleted = report.cleanup_deleted,
            vacuumed = report.vacuumed,
            downsampled = total_downsampled,
            "startup maintenance complete"
        );
    }

    report
}
