// HTTP + Server-Sent Events routes

mod http;
mod sse;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::history_repo::HistoryRepo;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) history_repo: Arc<HistoryRepo>,
    pub(crate) stream_connections: Arc<AtomicUsize>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    pub(crate) config: AppConfig,
}

pub fn app(
    history_repo: Arc<HistoryRepo>,
    stream_connections: Arc<AtomicUsize>,
    shutdown_rx: watch::Receiver<bool>,
    config: AppConfig,
) -> Router {
    let state = AppState {
        history_repo,
        stream_connections,
        shutdown_rx,
        config,
    };
    Router::new()
        .route("/", get(|| async { "homewatch is running" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/service/status", post(http::submit_status_handler)) // POST /api/service/status
        .route("/api/service/status/latest", get(http::latest_statuses_handler)) // GET /api/service/status/latest
        .route("/api/service/status/history", get(http::status_history_handler)) // GET /api/service/status/history
        .route("/api/stream/hardware-metrics", get(sse::stream_hardware_metrics)) // SSE /api/stream/hardware-metrics
        .route("/api/stream/service-statuses", get(sse::stream_service_statuses)) // SSE /api/stream/service-statuses
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
