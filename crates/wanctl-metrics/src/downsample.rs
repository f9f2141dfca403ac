//! Granularity downsampling.
//!
//! As data ages it is folded into coarser buckets so the database stays
//! bounded while long-range queries keep useful shape:
//!
//! | From → To | Bucket | Age     |
//! |-----------|--------|---------|
//! | raw → 1m  | 60 s   | > 1 h   |
//! | 1m → 5m   | 300 s  | > 1 d   |
//! | 5m → 1h   | 3600 s | > 7 d   |
//!
//! Buckets are aligned to their size and only aggregated once fully
//! elapsed; a bucket straddling the cutoff is left for the next pass.
//! State metrics aggregate with MODE, everything else with AVG.

use sqlx::{Row, SqliteConnection};

use crate::{names, Granularity};

/// One downsampling level.
#[derive(Debug, Clone, Copy)]
pub struct Level {
    pub from: Granularity,
    pub to: Granularity,
    pub bucket_seconds: i64,
    pub age_seconds: i64,
}

/// The fixed ladder, coarsest last.
pub const LEVELS: [Level; 3] = [
    Level {
        from: Granularity::Raw,
        to: Granularity::OneMinute,
        bucket_seconds: 60,
        age_seconds: 3_600,
    },
    Level {
        from: Granularity::OneMinute,
        to: Granularity::FiveMinutes,
        bucket_seconds: 300,
        age_seconds: 86_400,
    },
    Level {
        from: Granularity::FiveMinutes,
        to: Granularity::OneHour,
        bucket_seconds: 3_600,
        age_seconds: 604_800,
    },
];

/// Run every level against the given "now". Returns rows created per
/// level, in ladder order.
pub async fn downsample_metrics(
    conn: &mut SqliteConnection,
    now: i64,
) -> Result<Vec<(String, u64)>, sqlx::Error> {
    let mut results = Vec::with_capacity(LEVELS.len());
    for level in LEVELS {
        let cutoff = now - level.age_seconds;
        let created = downsample_level(conn, level, cutoff).await?;
        results.push((
            format!("{}->{}", level.from.as_str(), level.to.as_str()),
            created,
        ));
    }
    Ok(results)
}

/// Aggregate one level: fold data older than `cutoff` into buckets,
/// insert the aggregates at the target granularity, delete the sources.
pub async fn downsample_level(
    conn: &mut SqliteConnection,
    level: Level,
    cutoff: i64,
) -> Result<u64, sqlx::Error> {
    // End of the last bucket that has fully elapsed before the cutoff.
    let aligned_cutoff = cutoff - cutoff.rem_euclid(level.bucket_seconds);
    if aligned_cutoff <= 0 {
        return Ok(0);
    }

    let combos = sqlx::query(
        "SELECT DISTINCT metric_name, wan_name FROM metrics
         WHERE granularity = ? AND timestamp < ?",
    )
    .bind(level.from.as_str())
    .bind(aligned_cutoff)
    .fetch_all(&mut *conn)
    .await?;

    let mut rows_created = 0u64;

    for combo in combos {
        let metric_name: String = combo.get("metric_name");
        let wan_name: String = combo.get("wan_name");

        let range = sqlx::query(
            "SELECT MIN(timestamp) AS min_ts, MAX(timestamp) AS max_ts FROM metrics
             WHERE metric_name = ? AND wan_name = ? AND granularity = ? AND timestamp < ?",
        )
        .bind(&metric_name)
        .bind(&wan_name)
        .bind(level.from.as_str())
        .bind(aligned_cutoff)
        .fetch_one(&mut *conn)
        .await?;

        let (Some(min_ts), Some(max_ts)) = (
            range.get::<Option<i64>, _>("min_ts"),
            range.get::<Option<i64>, _>("max_ts"),
        ) else {
            continue;
        };

        let mut bucket_start = min_ts - min_ts.rem_euclid(level.bucket_seconds);
        while bucket_start <= max_ts {
            let bucket_end = bucket_start + level.bucket_seconds;
            if bucket_end <= aligned_cutoff {
                if let Some(value) =
                    aggregate_bucket(conn, &metric_name, &wan_name, level, bucket_start).await?
                {
                    sqlx::query(
                        "INSERT INTO metrics
                         (timestamp, wan_name, metric_name, value, labels, granularity)
                         VALUES (?, ?, ?, ?, NULL, ?)",
                    )
                    .bind(bucket_start)
                    .bind(&wan_name)
                    .bind(&metric_name)
                    .bind(value)
                    .bind(level.to.as_str())
                    .execute(&mut *conn)
                    .await?;
                    rows_created += 1;
                }
            }
            bucket_start = bucket_end;
        }

        // Only rows inside fully-elapsed buckets were aggregated; only
        // those may be deleted.
        sqlx::query(
            "DELETE FROM metrics
             WHERE metric_name = ? AND wan_name = ? AND granularity = ? AND timestamp < ?",
        )
        .bind(&metric_name)
        .bind(&wan_name)
        .bind(level.from.as_str())
        .bind(aligned_cutoff)
        .execute(&mut *conn)
        .await?;
    }

    if rows_created > 0 {
        tracing::info!(
            from = level.from.as_str(),
            to = level.to.as_str(),
            rows_created,
            "downsampled metrics"
        );
    }

    Ok(rows_created)
}

/// Aggregate one bucket: MODE for state metrics, AVG otherwise.
async fn aggregate_bucket(
    conn: &mut SqliteConnection,
    metric_name: &str,
    wan_name: &str,
    level: Level,
    bucket_start: i64,
) -> Result<Option<f64>, sqlx::Error> {
    let bucket_end = bucket_start + level.bucket_seconds;

    let value: Option<f64> = if names::uses_mode_aggregation(metric_name) {
        sqlx::query(
            "SELECT value, COUNT(*) AS cnt FROM metrics
             WHERE metric_name = ? AND wan_name = ? AND granularity = ?
               AND timestamp >= ? AND timestamp < ?
             GROUP BY value ORDER BY cnt DESC LIMIT 1",
        )
        .bind(metric_name)
        .bind(wan_name)
        .bind(level.from.as_str())
        .bind(bucket_start)
        .bind(bucket_end)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.get("value"))
    } else {
        sqlx::query(
            "SELECT AVG(value) AS avg_value FROM metrics
             WHERE metric_name = ? AND wan_name = ? AND granularity = ?
               AND timestamp >= ? AND timestamp < ?",
        )
        .bind(metric_name)
        .bind(wan_name)
        .bind(level.from.as_str())
        .bind(bucket_start)
        .bind(bucket_end)
        .fetch_one(&mut *conn)
        .await?
        .get("avg_value")
    };

    Ok(value)
}
