use anyhow::Result;
use homewatch::*;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let history_repo = Arc::new(
        history_repo::HistoryRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.retention_days,
        )
        .await?,
    );
    history_repo.init().await?;

    let stream_connections = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let probes = health::Probes::new(Duration::from_secs(app_config.collector.check_timeout_secs))?;
    let host_collector = collector::HostCollector::new(
        Arc::new(sysinfo_repo::SysinfoRepo::new()),
        probes,
        app_config.checks.clone(),
        app_config.collector.disk_mount.clone(),
    );
    tracing::info!(checks = app_config.checks.len(), "health checks loaded");

    let collector_handle = collector::spawn(
        collector::CollectorDeps {
            collector: host_collector,
            history_repo: history_repo.clone(),
            stream_connections: stream_connections.clone(),
            shutdown_rx: shutdown_rx.clone(),
        },
        collector::CollectorLoopConfig {
            interval_secs: app_config.collector.interval_secs,
            stats_log_interval_secs: app_config.collector.stats_log_interval_secs,
        },
    );

    let maintenance_handle = maintenance::spawn(
        history_repo.clone(),
        maintenance::MaintenanceWorkerConfig {
            prune_interval_secs: app_config.maintenance.prune_interval_secs,
            vacuum_schedule: app_config.maintenance.vacuum_schedule.clone(),
            vacuum_interval_secs: app_config.maintenance.vacuum_interval_secs,
        },
        shutdown_rx.clone(),
    );

    let app = routes::app(
        history_repo,
        stream_connections,
        shutdown_rx,
        app_config.clone(),
    );
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    // Flipping the watch ends every open stream, which lets graceful shutdown complete.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = collector_handle.await;
    let _ = maintenance_handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
