// SQLite history: hardware samples + service status rows, both append-only.
// Uses sqlx for async + connection pooling. Timestamps are UTC Unix milliseconds.

pub mod aggregation;

use crate::models::{HealthState, Sample, ServiceStatus};
use crate::stream::cursor::QueryPlan;
use crate::stream::{SampleSource, StatusSource};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub struct HistoryRepo {
    pool: SqlitePool,
    retention_ms: i64,
}

impl HistoryRepo {
    pub async fn connect(
        path: &str,
        max_pool_size: u32,
        retention_days: u32,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        aggregation::init_samples_table(&self.pool).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS service_status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_status_name_created_at ON service_status(name, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_sample(&self, sample: &Sample) -> anyhow::Result<()> {
        self.save_samples(std::slice::from_ref(sample)).await
    }

    #[instrument(skip(self, samples), fields(repo = "history", operation = "save_samples", samples_count = samples.len()))]
    pub async fn save_samples(&self, samples: &[Sample]) -> anyhow::Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in samples {
            sqlx::query(
                "INSERT INTO hardware_samples (created_at, cpu_percent, ram_percent, disk_percent) VALUES ($1, $2, $3, $4)",
            )
            .bind(s.timestamp)
            .bind(s.cpu_percent)
            .bind(s.ram_percent)
            .bind(s.disk_percent)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, statuses), fields(repo = "history", operation = "save_statuses", statuses_count = statuses.len()))]
    pub async fn save_statuses(&self, statuses: &[ServiceStatus]) -> anyhow::Result<()> {
        if statuses.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in statuses {
            sqlx::query(
                "INSERT INTO service_status (created_at, name, status, detail) VALUES ($1, $2, $3, $4)",
            )
            .bind(s.timestamp)
            .bind(&s.name)
            .bind(s.status.as_str())
            .bind(&s.detail)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Runs one stream poll: raw rows or bucket averages, ascending by timestamp.
    #[instrument(skip(self), fields(repo = "history", operation = "fetch_points", group = plan.resolution().as_str()))]
    pub async fn fetch_points(&self, plan: &QueryPlan) -> anyhow::Result<Vec<Sample>> {
        let sql = aggregation::plan_sql(plan);
        let rows = sqlx::query(&sql)
            .bind(aggregation::plan_bind(plan))
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_point_row(&row)?);
        }
        Ok(out)
    }

    /// Newest `limit` raw samples, ascending.
    pub async fn recent_samples(&self, limit: u32) -> anyhow::Result<Vec<Sample>> {
        let rows = sqlx::query(
            "SELECT created_at AS ts, cpu_percent, ram_percent, disk_percent
             FROM hardware_samples ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_point_row(&row)?);
        }
        out.reverse();
        Ok(out)
    }

    /// Most recent row per service name, ordered by name. Equal timestamps resolve to the
    /// last inserted row.
    #[instrument(skip(self), fields(repo = "history", operation = "latest_statuses"))]
    pub async fn latest_statuses(&self) -> anyhow::Result<Vec<ServiceStatus>> {
        let rows = sqlx::query(
            "SELECT name, status, detail, created_at
             FROM (
                 SELECT name, status, detail, created_at,
                        ROW_NUMBER() OVER (PARTITION BY name ORDER BY created_at DESC, id DESC) AS rn
                 FROM service_status
             ) ranked
             WHERE rn = 1
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_status_row(&row)?);
        }
        Ok(out)
    }

    /// Status rows for `name` in [from_ts, to_ts). Order: ascending by created_at.
    #[instrument(skip(self), fields(repo = "history", operation = "status_history"))]
    pub async fn status_history(
        &self,
        name: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<ServiceStatus>> {
        let rows = sqlx::query(
            "SELECT name, status, detail, created_at
             FROM service_status
             WHERE name = $1 AND created_at >= $2 AND created_at < $3
             ORDER BY created_at ASC, id ASC",
        )
        .bind(name)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_status_row(&row)?);
        }
        Ok(out)
    }

    /// Deletes samples and status rows older than the retention window. Returns rows removed.
    #[instrument(skip(self), fields(repo = "history", operation = "prune_old_data"))]
    pub async fn prune_old_data(&self) -> anyhow::Result<u64> {
        let cutoff = chrono::Utc::now().timestamp_millis() - self.retention_ms;
        let mut tx = self.pool.begin().await?;
        let samples = sqlx::query("DELETE FROM hardware_samples WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        let statuses = sqlx::query("DELETE FROM service_status WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(samples.rows_affected() + statuses.rows_affected())
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "history", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_point_row(row: &SqliteRow) -> anyhow::Result<Sample> {
        Ok(Sample {
            timestamp: row.try_get("ts")?,
            cpu_percent: row.try_get("cpu_percent")?,
            ram_percent: row.try_get("ram_percent")?,
            disk_percent: row.try_get("disk_percent")?,
        })
    }

    fn parse_status_row(row: &SqliteRow) -> anyhow::Result<ServiceStatus> {
        let status: String = row.try_get("status")?;
        Ok(ServiceStatus {
            name: row.try_get("name")?,
            status: HealthState::from_str(&status)?,
            detail: row.try_get("detail")?,
            timestamp: row.try_get("created_at")?,
        })
    }
}

impl SampleSource for HistoryRepo {
    async fn fetch_points(&self, plan: &QueryPlan) -> anyhow::Result<Vec<Sample>> {
        HistoryRepo::fetch_points(self, plan).await
    }
}

impl StatusSource for HistoryRepo {
    async fn latest_statuses(&self) -> anyhow::Result<Vec<ServiceStatus>> {
        HistoryRepo::latest_statuses(self).await
    }
}
