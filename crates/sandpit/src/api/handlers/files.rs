//! Workspace file handlers.
//!
//! Paths are relative to the workspace root.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::auth::CurrentUser;
use crate::container::{FileEntry, FileStat};

use super::owned_session;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[instrument(skip(state, user))]
pub async fn read_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileContentResponse>> {
    owned_session(&state, &user, &session_id).await?;
    let content = state.sessions.read_file(&session_id, &query.path).await?;
    Ok(Json(FileContentResponse {
        path: query.path,
        content,
    }))
}

#[instrument(skip(state, user, request))]
pub async fn write_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(request): Json<WriteFileRequest>,
) -> ApiResult<StatusCode> {
    owned_session(&state, &user, &session_id).await?;
    state
        .sessions
        .write_file(&session_id, &request.path, request.content.as_bytes())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user))]
pub async fn list_dir(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Vec<FileEntry>>> {
    owned_session(&state, &user, &session_id).await?;
    let entries = state.sessions.list_dir(&session_id, &query.path).await?;
    Ok(Json(entries))
}

#[instrument(skip(state, user))]
pub async fn stat_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileStat>> {
    owned_session(&state, &user, &session_id).await?;
    let stat = state.sessions.stat(&session_id, &query.path).await?;
    Ok(Json(stat))
}
