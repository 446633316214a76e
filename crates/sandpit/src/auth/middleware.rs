//! Authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{HeaderMap, HeaderValue, Uri, header::AUTHORIZATION, header::COOKIE, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use log::{debug, warn};

use super::{AuthConfig, AuthError, Claims};

/// User every request acts as when auth is disabled.
pub const DEV_USER_ID: &str = "dev";

/// Cookie carrying the token for browser clients.
const AUTH_COOKIE: &str = "auth_token";

fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }
    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name.trim() == cookie_name).then(|| value.trim())
    })
}

fn token_from_query(uri: &Uri) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Find the request's token: bearer header, then cookie, then `?token=`.
///
/// WebSocket clients in browsers cannot set headers, hence the fallbacks.
pub fn request_token(headers: &HeaderMap, uri: &Uri) -> Result<Option<String>, AuthError> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let header = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        return bearer_token_from_header(header).map(|t| Some(t.to_string()));
    }
    let cookie = headers
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| token_from_cookie_header(h, AUTH_COOKIE));
    if let Some(token) = cookie {
        return Ok(Some(token.to_string()));
    }
    Ok(token_from_query(uri))
}

/// Drop every credential [`request_token`] would accept: the
/// `Authorization` header and the auth cookie. Other cookies are kept.
pub fn strip_credentials(headers: &mut HeaderMap) {
    headers.remove(AUTHORIZATION);

    let kept: Vec<String> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .filter(|pair| {
            !pair.is_empty()
                && pair.split_once('=').map(|(name, _)| name.trim()) != Some(AUTH_COOKIE)
        })
        .map(str::to_string)
        .collect();
    headers.remove(COOKIE);
    if !kept.is_empty()
        && let Ok(value) = HeaderValue::from_str(&kept.join("; "))
    {
        headers.insert(COOKIE, value);
    }
}

/// `query` without its `token` parameter, or `None` when nothing remains.
pub fn strip_token_query(query: &str) -> Option<String> {
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            !pair.is_empty() && pair.split_once('=').map_or(*pair, |(key, _)| key) != "token"
        })
        .collect();
    (!kept.is_empty()).then(|| kept.join("&"))
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Resolves `env:` secrets at construction time.
    pub fn new(mut config: AuthConfig) -> Self {
        match config.resolve_jwt_secret() {
            Ok(resolved) => config.jwt_secret = resolved,
            Err(err) => {
                warn!("{}", err);
                config.jwt_secret = None;
            }
        }
        let decoding_key = config
            .jwt_secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));
        Self {
            config: Arc::new(config),
            decoding_key,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Validate an HS256 token. `exp` is checked when present.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            debug!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        Ok(data.claims)
    }

    /// Resolve the caller for a request.
    pub fn authenticate(&self, headers: &HeaderMap, uri: &Uri) -> Result<CurrentUser, AuthError> {
        if !self.config.enabled {
            return Ok(CurrentUser::dev());
        }
        let token = request_token(headers, uri)?.ok_or(AuthError::MissingAuthHeader)?;
        let claims = self.validate_token(&token)?;
        Ok(CurrentUser { claims })
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

impl CurrentUser {
    pub fn dev() -> Self {
        Self {
            claims: Claims::for_user(DEV_USER_ID),
        }
    }

    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn is_admin(&self) -> bool {
        self.claims.is_admin()
    }

    /// Whether this user may act on a resource owned by `owner`.
    pub fn can_access(&self, owner: &str) -> bool {
        self.id() == owner || self.is_admin()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Validates the caller and injects [`CurrentUser`] into request extensions.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let user = auth.authenticate(req.headers(), req.uri())?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
