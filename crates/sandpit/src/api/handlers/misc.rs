//! Health check.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::warn;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub engine_version: String,
}

/// Health check; 503 when the container engine is unreachable.
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let engine_version = state.sessions.runtime().health_check().await.map_err(|e| {
        warn!("Container engine health check failed: {}", e);
        ApiError::service_unavailable(format!("container engine unavailable: {e}"))
    })?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine_version,
    }))
}
