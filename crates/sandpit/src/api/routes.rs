//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{any, get, post, put},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;

use super::handlers;
use super::proxy;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    let protected_routes = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{session_id}/stop", post(handlers::stop_session))
        .route("/sessions/{session_id}/usable", get(handlers::assert_usable))
        .route(
            "/sessions/{session_id}/events",
            get(handlers::list_session_events),
        )
        .route("/sessions/{session_id}/exec", post(handlers::exec))
        .route("/sessions/{session_id}/files/read", get(handlers::read_file))
        .route("/sessions/{session_id}/files/write", put(handlers::write_file))
        .route("/sessions/{session_id}/files/list", get(handlers::list_dir))
        .route("/sessions/{session_id}/files/stat", get(handlers::stat_file))
        .route(
            "/sessions/{session_id}/preview",
            get(handlers::get_preview).post(handlers::register_preview),
        )
        .route(
            "/sessions/{session_id}/snapshot",
            post(handlers::snapshot_session),
        )
        .route("/users/{user_id}/quota", get(handlers::get_user_quota))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    // Preview traffic authenticates itself so browsers can use cookies or
    // `?token=` on WebSocket upgrades.
    let preview_routes = Router::new()
        .route("/preview/{session_id}", any(proxy::proxy_preview_root))
        .route("/preview/{session_id}/", any(proxy::proxy_preview_root))
        .route("/preview/{session_id}/{*path}", any(proxy::proxy_preview));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .merge(preview_routes)
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from configured origins.
///
/// With no origins configured any origin is allowed when auth is disabled
/// and none when it is enabled.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
        header::COOKIE,
    ];

    let allowed_origins = state.auth.allowed_origins();
    if allowed_origins.is_empty() {
        if state.auth.is_enabled() {
            tracing::warn!("CORS: no origins configured, denying cross-origin requests");
            return CorsLayer::new()
                .allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
        }
        return CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        tracing::error!("CORS: all configured origins are invalid");
        return CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    tracing::info!("CORS: allowing {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
