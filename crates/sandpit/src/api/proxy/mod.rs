//! Preview reverse proxy.
//!
//! `/preview/{session_id}/...` is forwarded to the session's registered
//! preview port with the prefix stripped. WebSocket upgrades are relayed
//! the same way so dev-server live reload keeps working.

mod http;
mod websocket;

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, State, WebSocketUpgrade},
    http::{HeaderMap, Request, Uri, header},
    response::{IntoResponse, Response},
};
use log::{debug, warn};

use crate::auth::{AuthError, request_token, strip_token_query};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Path and query to send upstream for a request under the preview prefix.
///
/// A `token` query parameter is dropped; workspace code never sees it.
fn upstream_path(uri: &Uri, session_id: &str) -> String {
    let prefix = format!("/preview/{session_id}");
    let rest = uri.path().strip_prefix(&prefix).unwrap_or("");
    let mut path = if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    };
    if let Some(query) = uri.query().and_then(strip_token_query) {
        path.push('?');
        path.push_str(&query);
    }
    path
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Require a token whose subject owns the session, when configured.
async fn authorize(
    state: &AppState,
    session_id: &str,
    headers: &HeaderMap,
    uri: &Uri,
) -> ApiResult<()> {
    let session = state.sessions.require_session(session_id).await?;

    if !state.auth.is_enabled() || !state.preview_settings.require_auth {
        return Ok(());
    }

    let token = request_token(headers, uri)?.ok_or(AuthError::MissingAuthHeader)?;
    let claims = state.auth.validate_token(&token)?;
    if claims.sub != session.user_id {
        return Err(ApiError::forbidden(format!(
            "session {session_id} belongs to another user"
        )));
    }
    Ok(())
}

async fn proxy_session(
    state: AppState,
    session_id: String,
    req: Request<Body>,
) -> ApiResult<Response> {
    authorize(&state, &session_id, req.headers(), req.uri()).await?;
    let target = state.preview.route(&session_id).await?;
    let path = upstream_path(req.uri(), &session_id);

    if is_websocket_upgrade(req.headers()) {
        let (mut parts, _body) = req.into_parts();
        let ws = WebSocketUpgrade::from_request_parts(&mut parts, &state)
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid websocket upgrade: {e}")))?;
        let protocols = parts
            .headers
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());

        let target_url = target.ws_url(&path);
        let (upstream, selected) = websocket::connect_upstream(&target_url, protocols).await?;
        let ws = match selected {
            Some(protocol) => ws.protocols([protocol]),
            None => ws,
        };

        debug!("Relaying preview WebSocket for session {}", session_id);
        return Ok(ws
            .on_upgrade(move |socket| async move {
                if let Err(e) = websocket::relay(socket, upstream).await {
                    warn!("Preview WebSocket relay for {} ended: {:?}", session_id, e);
                }
            })
            .into_response());
    }

    http::forward(
        &state.http_client,
        req,
        &target,
        &path,
        state.preview_settings.max_body_bytes,
    )
    .await
}

/// `/preview/{session_id}`
pub async fn proxy_preview_root(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Request<Body>,
) -> ApiResult<Response> {
    proxy_session(state, session_id, req).await
}

/// `/preview/{session_id}/{*path}`
pub async fn proxy_preview(
    State(state): State<AppState>,
    Path((session_id, _path)): Path<(String, String)>,
    req: Request<Body>,
) -> ApiResult<Response> {
    proxy_session(state, session_id, req).await
}
