// Bucketing: schema for the samples table + SQL for each query plan.
// Execution (bind, fetch, row parsing) stays in history_repo::mod.

use sqlx::SqlitePool;

use crate::stream::cursor::{QueryPlan, Resolution};

/// Creates the hardware_samples table and index if not present.
pub async fn init_samples_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hardware_samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            cpu_percent REAL NOT NULL,
            ram_percent REAL NOT NULL,
            disk_percent REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_samples_created_at ON hardware_samples(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Bucket start of `created_at` (UTC ms) for a resolution. Fixed fragments only;
/// integer division floors for the non-negative timestamps the collector writes.
pub(crate) fn bucket_expr(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::None => "created_at",
        Resolution::Minute => "(created_at / 60000) * 60000",
        Resolution::Hour => "(created_at / 3600000) * 3600000",
        Resolution::Day => "(created_at / 86400000) * 86400000",
        Resolution::Month => {
            "CAST(strftime('%s', created_at / 1000, 'unixepoch', 'start of month') AS INTEGER) * 1000"
        }
    }
}

/// SQL for a plan. Every statement takes one bind (`?1`): the row limit for initial
/// plans, the cursor for incremental ones. Result columns: ts, cpu_percent, ram_percent,
/// disk_percent, ascending by ts.
pub(crate) fn plan_sql(plan: &QueryPlan) -> String {
    match *plan {
        QueryPlan::Initial {
            resolution: Resolution::None,
            ..
        } => "SELECT created_at AS ts, cpu_percent, ram_percent, disk_percent
              FROM (
                  SELECT id, created_at, cpu_percent, ram_percent, disk_percent
                  FROM hardware_samples
                  ORDER BY created_at DESC, id DESC
                  LIMIT ?1
              ) recent
              ORDER BY created_at ASC, id ASC"
            .to_string(),
        QueryPlan::Incremental {
            resolution: Resolution::None,
            ..
        } => "SELECT created_at AS ts, cpu_percent, ram_percent, disk_percent
              FROM hardware_samples
              WHERE created_at > ?1
              ORDER BY created_at ASC, id ASC"
            .to_string(),
        // Average over the newest `limit` raw rows, not over `limit` buckets.
        QueryPlan::Initial { resolution, .. } => format!(
            "SELECT {bucket} AS ts,
                    AVG(cpu_percent) AS cpu_percent,
                    AVG(ram_percent) AS ram_percent,
                    AVG(disk_percent) AS disk_percent
             FROM (
                 SELECT created_at, cpu_percent, ram_percent, disk_percent
                 FROM hardware_samples
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1
             ) recent
             GROUP BY ts
             ORDER BY ts ASC",
            bucket = bucket_expr(resolution)
        ),
        // Buckets whose start is not newer than the cursor were already emitted; rows that
        // land in them late are dropped rather than re-sent with a revised average.
        QueryPlan::Incremental { resolution, .. } => format!(
            "SELECT ts, cpu_percent, ram_percent, disk_percent
             FROM (
                 SELECT {bucket} AS ts,
                        AVG(cpu_percent) AS cpu_percent,
                        AVG(ram_percent) AS ram_percent,
                        AVG(disk_percent) AS disk_percent
                 FROM hardware_samples
                 WHERE created_at > ?1
                 GROUP BY ts
             ) buckets
             WHERE ts > ?1
             ORDER BY ts ASC",
            bucket = bucket_expr(resolution)
        ),
    }
}

/// Value bound to `?1` for a plan.
pub(crate) fn plan_bind(plan: &QueryPlan) -> i64 {
    match *plan {
        QueryPlan::Initial { limit, .. } => limit as i64,
        QueryPlan::Incremental { after, .. } => after,
    }
}
