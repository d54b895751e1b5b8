// Background collector: samples the host and runs health checks on a fixed interval,
// appending one sample and one status row per check to the history store.

use crate::health::{HealthCheck, Probes, hardware_status};
use crate::history_repo::HistoryRepo;
use crate::models::{Sample, ServiceStatus};
use crate::sysinfo_repo::SysinfoRepo;
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::watch;
use tokio::time::{Duration, interval};

/// Output of one collection pass.
#[derive(Debug, Clone)]
pub struct Collection {
    pub sample: Sample,
    pub statuses: Vec<ServiceStatus>,
}

/// Produces one sample and zero or more statuses per call.
pub trait Collector: Send + Sync + 'static {
    fn collect(&self) -> impl Future<Output = anyhow::Result<Collection>> + Send;
}

/// Collector for the machine the server runs on.
pub struct HostCollector {
    sysinfo_repo: Arc<SysinfoRepo>,
    probes: Probes,
    checks: Vec<HealthCheck>,
    disk_mount: String,
}

impl HostCollector {
    pub fn new(
        sysinfo_repo: Arc<SysinfoRepo>,
        probes: Probes,
        checks: Vec<HealthCheck>,
        disk_mount: String,
    ) -> Self {
        Self {
            sysinfo_repo,
            probes,
            checks,
            disk_mount,
        }
    }
}

impl Collector for HostCollector {
    async fn collect(&self) -> anyhow::Result<Collection> {
        let now = chrono::Utc::now().timestamp_millis();
        let sample = self.sysinfo_repo.sample(now, &self.disk_mount).await?;
        let mut statuses = join_all(self.checks.iter().map(|c| c.check(&self.probes, now))).await;
        statuses.push(hardware_status(&sample));
        Ok(Collection { sample, statuses })
    }
}

/// Store, live-connection counter and shutdown for the collector loop.
pub struct CollectorDeps<C> {
    pub collector: C,
    pub history_repo: Arc<HistoryRepo>,
    pub stream_connections: Arc<AtomicUsize>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Collector timing and logging config.
pub struct CollectorLoopConfig {
    pub interval_secs: u64,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
}

/// Spawns the collector loop. The first collection runs immediately.
pub fn spawn<C: Collector>(
    deps: CollectorDeps<C>,
    config: CollectorLoopConfig,
) -> tokio::task::JoinHandle<()> {
    let CollectorDeps {
        collector,
        history_repo,
        stream_connections,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(config.interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(config.stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick of an interval completes at once; stats start one period in.
        stats_log_tick.tick().await;

        let mut samples_saved_total: u64 = 0;
        let mut collections_failed_total: u64 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    match collect_once(&collector, &history_repo).await {
                        Ok(()) => samples_saved_total += 1,
                        Err(e) => {
                            collections_failed_total += 1;
                            tracing::warn!(
                                error = %e,
                                operation = "collect",
                                "collection failed"
                            );
                        }
                    }
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        stream_clients =
                            stream_connections.load(std::sync::atomic::Ordering::Relaxed),
                        samples_saved_total,
                        collections_failed_total,
                        "app stats"
                    );
                }
            }
        }
        tracing::debug!("Collector shutting down");
    })
}

/// One pass: collect, then append statuses and the sample (one transaction each).
pub async fn collect_once<C: Collector>(
    collector: &C,
    history_repo: &HistoryRepo,
) -> anyhow::Result<()> {
    let Collection { sample, statuses } = collector.collect().await?;
    if let Err(e) = history_repo.save_statuses(&statuses).await {
        tracing::warn!(
            error = %e,
            operation = "save_statuses",
            "failed to insert service statuses"
        );
    }
    history_repo.save_sample(&sample).await?;
    tracing::debug!(
        operation = "collect",
        statuses_count = statuses.len(),
        cpu_percent = sample.cpu_percent,
        "sample saved"
    );
    Ok(())
}
