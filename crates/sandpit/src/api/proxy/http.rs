//! Plain HTTP forwarding.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode, Uri, header},
    response::Response,
};
use bytes::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use log::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::auth::strip_credentials;
use crate::preview::PreviewTarget;

/// Headers that describe the client hop, not the request.
const HOP_BY_HOP: [header::HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::UPGRADE,
];

fn payload_too_large(limit: usize) -> ApiError {
    ApiError::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        "payload_too_large",
        format!("request body exceeds {limit} bytes"),
    )
}

/// Reject early when the declared body is already over the limit.
pub(crate) fn enforce_body_limit(headers: &HeaderMap, max_body_bytes: usize) -> ApiResult<()> {
    if let Some(value) = headers.get(header::CONTENT_LENGTH) {
        let length = value
            .to_str()
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .ok_or_else(|| ApiError::bad_request("invalid content-length header"))?;
        if length > max_body_bytes {
            return Err(payload_too_large(max_body_bytes));
        }
    }
    Ok(())
}

/// Forward `req` to `target`, buffering the body up to `max_body_bytes`.
///
/// Connection failures become 502 so callers can tell a dead preview
/// server from a sandbox error.
pub(crate) async fn forward(
    client: &Client<HttpConnector, Body>,
    req: Request<Body>,
    target: &PreviewTarget,
    path_and_query: &str,
    max_body_bytes: usize,
) -> ApiResult<Response> {
    let target_uri = target.http_url(path_and_query);
    let uri: Uri = target_uri
        .parse()
        .map_err(|e| ApiError::internal(format!("invalid target uri {target_uri}: {e}")))?;

    let (parts, body) = req.into_parts();
    enforce_body_limit(&parts.headers, max_body_bytes)?;
    let body_bytes: Bytes = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| {
            warn!("Failed to buffer preview request body: {}", e);
            payload_too_large(max_body_bytes)
        })?;

    let mut forwarded = Request::builder()
        .method(parts.method)
        .uri(uri)
        .version(parts.version)
        .body(Body::from(body_bytes.clone()))
        .map_err(|e| ApiError::internal(format!("failed to build proxy request: {e}")))?;

    *forwarded.headers_mut() = parts.headers;
    strip_credentials(forwarded.headers_mut());
    for name in HOP_BY_HOP {
        forwarded.headers_mut().remove(name);
    }
    forwarded
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body_bytes.len()));
    if let Some(authority) = forwarded.uri().authority() {
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ApiError::internal(format!("invalid host header: {e}")))?;
        forwarded.headers_mut().insert(header::HOST, host);
    }

    debug!("Proxying preview request to {}", target_uri);
    let response = client.request(forwarded).await.map_err(|e| {
        warn!("Preview upstream {} failed: {}", target_uri, e);
        ApiError::bad_gateway(format!("preview server unreachable: {e}"))
    })?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}
