//! Session handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::auth::CurrentUser;
use crate::container::ExecOutput;
use crate::governance::GovernanceEvent;
use crate::preview::PreviewTarget;
use crate::session::{CreateSessionRequest, ExecParams, Session};
use crate::workspace::SnapshotInfo;

use super::owned_session;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// List the caller's sessions.
#[instrument(skip(state, user))]
pub async fn list_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state.sessions.list_sessions(Some(user.id())).await?;
    info!(count = sessions.len(), "Listed sessions");
    Ok(Json(sessions))
}

#[instrument(skip(state, user, request))]
pub async fn create_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.sessions.create_session(user.id(), request).await?;
    info!(session_id = %session.id, "Created session");
    Ok((StatusCode::CREATED, Json(session)))
}

#[instrument(skip(state, user))]
pub async fn get_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = owned_session(&state, &user, &session_id).await?;
    Ok(Json(session))
}

#[instrument(skip(state, user))]
pub async fn stop_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    owned_session(&state, &user, &session_id).await?;
    let session = state.sessions.stop_session(&session_id).await?;
    Ok(Json(session))
}

#[instrument(skip(state, user))]
pub async fn delete_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    owned_session(&state, &user, &session_id).await?;
    state.sessions.delete_session(&session_id).await?;
    info!(session_id = %session_id, "Deleted session");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct UsableResponse {
    pub session_id: String,
    pub usable: bool,
}

/// Governance probe: 200 when usable, otherwise the governance error.
#[instrument(skip(state, user))]
pub async fn assert_usable(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<UsableResponse>> {
    owned_session(&state, &user, &session_id).await?;
    state.sessions.assert_usable(&session_id).await?;
    Ok(Json(UsableResponse {
        session_id,
        usable: true,
    }))
}

#[instrument(skip(state, user))]
pub async fn list_session_events(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<GovernanceEvent>>> {
    owned_session(&state, &user, &session_id).await?;
    let events = state
        .sessions
        .governor()
        .events()
        .list_for_session(&session_id)
        .await?;
    Ok(Json(events))
}

#[instrument(skip(state, user, params))]
pub async fn exec(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(params): Json<ExecParams>,
) -> ApiResult<Json<ExecOutput>> {
    owned_session(&state, &user, &session_id).await?;
    let output = state.sessions.exec(&session_id, params).await?;
    info!(exit_code = output.exit_code, truncated = output.truncated, "Exec finished");
    Ok(Json(output))
}

#[instrument(skip(state, user))]
pub async fn snapshot_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SnapshotInfo>> {
    owned_session(&state, &user, &session_id).await?;
    let info = state.sessions.snapshot_session(&session_id).await?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
pub struct RegisterPreviewRequest {
    /// Wider than `u16` so out-of-range ports get a 400, not a decode error.
    pub port: u32,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub session_id: String,
    pub port: u16,
    /// Public path the preview is reachable at.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PreviewTarget>,
}

fn preview_path(session_id: &str) -> String {
    format!("/preview/{session_id}/")
}

#[instrument(skip(state, user))]
pub async fn register_preview(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(request): Json<RegisterPreviewRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    owned_session(&state, &user, &session_id).await?;
    let port = u16::try_from(request.port).map_err(|_| {
        ApiError::bad_request(format!(
            "preview port must be between 1024 and 65535, got {}",
            request.port
        ))
    })?;
    state.preview.register_port(&session_id, port).await?;
    Ok(Json(PreviewResponse {
        path: preview_path(&session_id),
        session_id,
        port,
        target: None,
    }))
}

/// Registered port and the upstream it currently resolves to.
#[instrument(skip(state, user))]
pub async fn get_preview(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<PreviewResponse>> {
    owned_session(&state, &user, &session_id).await?;
    let target = state.preview.route(&session_id).await?;
    Ok(Json(PreviewResponse {
        path: preview_path(&session_id),
        session_id,
        port: target.port,
        target: Some(target),
    }))
}
