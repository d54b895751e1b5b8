// Plain HTTP handlers: version, status ingestion and status queries

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;
use crate::models::{ServiceStatus, StatusSubmission};
use crate::version::{NAME, VERSION};

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /api/service/status: appends one status row stamped with the receipt time.
pub(super) async fn submit_status_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let submission: StatusSubmission = serde_json::from_slice(&body).map_err(|e| {
        tracing::info!(error = %e, "could not decode status submission");
        ApiError::BadRequest(format!("invalid JSON: {}", e))
    })?;
    let status = submission.into_status(chrono::Utc::now().timestamp_millis());
    state.history_repo.save_statuses(&[status]).await?;
    Ok(StatusCode::CREATED)
}

/// GET /api/service/status/latest: newest row per service name.
pub(super) async fn latest_statuses_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    Ok(Json(state.history_repo.latest_statuses().await?))
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryParams {
    name: String,
    from: Option<i64>,
    to: Option<i64>,
}

/// GET /api/service/status/history?name=&from=&to=: rows for one service in [from, to).
pub(super) async fn status_history_handler(
    State(state): State<AppState>,
    params: Result<Query<HistoryParams>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let from = params.from.unwrap_or(0);
    let to = params
        .to
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() + 1);
    let rows = state
        .history_repo
        .status_history(&params.name, from, to)
        .await?;
    Ok(Json(rows))
}
