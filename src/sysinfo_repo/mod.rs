// Host gauges via sysinfo: CPU, RAM and disk usage as percentages.

use crate::models::Sample;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Disks, System};
use tracing::instrument;

pub struct SysinfoRepo {
    sys: Arc<std::sync::Mutex<System>>,
    disks: Arc<std::sync::Mutex<Disks>>,
    last_cpu_refresh: Arc<std::sync::Mutex<Option<(Instant, f64)>>>,
}

impl Default for SysinfoRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoRepo {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        let disks = Disks::new_with_refreshed_list();
        Self {
            sys: Arc::new(std::sync::Mutex::new(sys)),
            disks: Arc::new(std::sync::Mutex::new(disks)),
            last_cpu_refresh: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// One sample stamped with `timestamp` (UTC ms).
    pub async fn sample(&self, timestamp: i64, disk_mount: &str) -> anyhow::Result<Sample> {
        let cpu_percent = self.get_cpu_percent().await?;
        let ram_percent = self.get_ram_percent().await?;
        let disk_percent = self.get_disk_percent(disk_mount).await?;
        Ok(Sample {
            timestamp,
            cpu_percent,
            ram_percent,
            disk_percent,
        })
    }

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_cpu_percent"))]
    pub async fn get_cpu_percent(&self) -> anyhow::Result<f64> {
        let sys = self.sys.clone();
        let last_cpu_refresh = self.last_cpu_refresh.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;

            let now = Instant::now();
            let mut guard = last_cpu_refresh
                .lock()
                .map_err(|e| anyhow::anyhow!("cpu cache lock poisoned: {}", e))?;
            let usage = match *guard {
                // Too soon for a meaningful delta; reuse the last reading.
                Some((prev_ts, prev_usage))
                    if now.duration_since(prev_ts) < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL =>
                {
                    prev_usage
                }
                _ => {
                    sys.refresh_cpu_all();
                    let usage = sys.global_cpu_usage() as f64;
                    *guard = Some((now, usage));
                    usage
                }
            };
            Ok(usage.clamp(0.0, 100.0))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_ram_percent"))]
    pub async fn get_ram_percent(&self) -> anyhow::Result<f64> {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_memory();

            let total = sys.total_memory();
            let used = total.saturating_sub(sys.available_memory());
            Ok(percent(used, total))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    /// Usage of the filesystem mounted at `mount`; the largest disk when no mount matches.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_disk_percent"))]
    pub async fn get_disk_percent(&self, mount: &str) -> anyhow::Result<f64> {
        let disks = self.disks.clone();
        let mount = mount.to_string();
        tokio::task::spawn_blocking(move || {
            let mut disks_guard = disks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo disks lock poisoned: {}", e))?;
            disks_guard.refresh(true);
            let list = disks_guard.list();
            let disk = list
                .iter()
                .find(|d| d.mount_point() == Path::new(&mount))
                .or_else(|| list.iter().max_by_key(|d| d.total_space()))
                .ok_or_else(|| anyhow::anyhow!("no disks found"))?;
            let total = disk.total_space();
            let used = total.saturating_sub(disk.available_space());
            Ok(percent(used, total))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
