//! Application state shared across handlers.

use axum::body::Body;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::auth::AuthState;
use crate::preview::PreviewProxy;
use crate::quota::QuotaGate;
use crate::session::SessionService;

/// Preview proxy settings for the API layer.
#[derive(Debug, Clone)]
pub struct PreviewState {
    /// Require a token whose subject owns the session.
    pub require_auth: bool,
    /// Largest request body buffered for forwarding.
    pub max_body_bytes: usize,
}

impl Default for PreviewState {
    fn default() -> Self {
        Self {
            require_auth: true,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
    pub preview: PreviewProxy,
    pub quota: QuotaGate,
    pub auth: AuthState,
    pub preview_settings: PreviewState,
    /// Shared client for preview forwarding.
    pub http_client: Client<HttpConnector, Body>,
}

impl AppState {
    pub fn new(
        sessions: SessionService,
        preview: PreviewProxy,
        quota: QuotaGate,
        auth: AuthState,
        preview_settings: PreviewState,
    ) -> Self {
        let http_client: Client<HttpConnector, Body> =
            Client::builder(TokioExecutor::new()).build_http();
        Self {
            sessions,
            preview,
            quota,
            auth,
            preview_settings,
            http_client,
        }
    }
}
