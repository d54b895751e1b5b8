use std::collections::HashSet;
use std::str::FromStr;

use serde::Deserialize;

use crate::health::{HARDWARE_CHECK_NAME, HealthCheck};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Poll interval of every live stream.
    pub tick_interval_secs: u64,
    /// Events buffered per connection before a slow client starts timing out.
    pub channel_capacity: usize,
    /// SSE keep-alive comment interval for idle streams.
    pub keep_alive_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            channel_capacity: 256,
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub interval_secs: u64,
    /// Mount point whose usage is reported as disk_percent.
    pub disk_mount: String,
    pub check_timeout_secs: u64,
    /// How often to log app stats (stream clients, samples saved) at INFO level.
    pub stats_log_interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            disk_mount: "/".into(),
            check_timeout_secs: 5,
            stats_log_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub prune_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: 3600,
            vacuum_schedule: None,
            vacuum_interval_secs: 86_400,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.streaming.tick_interval_secs > 0,
            "streaming.tick_interval_secs must be > 0, got {}",
            self.streaming.tick_interval_secs
        );
        anyhow::ensure!(
            self.streaming.channel_capacity > 0,
            "streaming.channel_capacity must be > 0, got {}",
            self.streaming.channel_capacity
        );
        anyhow::ensure!(
            self.streaming.keep_alive_secs > 0,
            "streaming.keep_alive_secs must be > 0, got {}",
            self.streaming.keep_alive_secs
        );
        anyhow::ensure!(
            self.collector.interval_secs > 0,
            "collector.interval_secs must be > 0, got {}",
            self.collector.interval_secs
        );
        anyhow::ensure!(
            self.collector.check_timeout_secs > 0,
            "collector.check_timeout_secs must be > 0, got {}",
            self.collector.check_timeout_secs
        );
        anyhow::ensure!(
            self.collector.stats_log_interval_secs > 0,
            "collector.stats_log_interval_secs must be > 0, got {}",
            self.collector.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.maintenance.prune_interval_secs > 0,
            "maintenance.prune_interval_secs must be > 0, got {}",
            self.maintenance.prune_interval_secs
        );
        anyhow::ensure!(
            self.maintenance.vacuum_interval_secs > 0,
            "maintenance.vacuum_interval_secs must be > 0, got {}",
            self.maintenance.vacuum_interval_secs
        );
        if let Some(ref expr) = self.maintenance.vacuum_schedule {
            cron::Schedule::from_str(expr).map_err(|e| {
                anyhow::anyhow!("maintenance.vacuum_schedule {:?} is invalid: {}", expr, e)
            })?;
        }
        let mut names = HashSet::new();
        for check in &self.checks {
            anyhow::ensure!(!check.name().is_empty(), "checks: name must be non-empty");
            anyhow::ensure!(
                check.name() != HARDWARE_CHECK_NAME,
                "checks: name {:?} is reserved for the host status",
                HARDWARE_CHECK_NAME
            );
            anyhow::ensure!(
                names.insert(check.name()),
                "checks: duplicate name {:?}",
                check.name()
            );
        }
        Ok(())
    }
}
