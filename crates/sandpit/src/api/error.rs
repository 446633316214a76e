//! API error types.
//!
//! Every error renders as JSON `{error, code, details?}` with a status
//! that tells the caller whether retrying can help.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use serde::Serialize;
use serde_json::{Value, json};

use crate::auth::AuthError;
use crate::container::ContainerError;
use crate::governance::GovernanceError;
use crate::preview::PreviewError;
use crate::session::SessionError;
use crate::workspace::ArchiveError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, "gone", message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "too_many_requests", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "bad_gateway", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            message,
        )
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn error_code(&self) -> &'static str {
        self.code
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("API error {}: {}", self.status, self.message);
        }
        let body = ErrorResponse {
            error: self.message,
            code: self.code,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<GovernanceError> for ApiError {
    fn from(err: GovernanceError) -> Self {
        let message = err.to_string();
        match err {
            GovernanceError::NotFound(_) => ApiError::not_found(message),
            GovernanceError::Gone { session_id, reason } => {
                ApiError::new(StatusCode::GONE, "session_terminated", message).with_details(
                    json!({
                        "session_id": session_id,
                        "reason": reason,
                    }),
                )
            }
            GovernanceError::QuotaExceeded(eval) => {
                let details = json!({
                    "reason": "quota_exceeded",
                    "quota": serde_json::to_value(&*eval).unwrap_or(Value::Null),
                });
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, "quota_exceeded", message)
                    .with_details(details)
            }
            GovernanceError::ConcurrencyLimit { in_flight, limit } => ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "concurrency_limit",
                message,
            )
            .with_details(json!({
                "reason": "concurrency_limit",
                "in_flight": in_flight,
                "limit": limit,
            })),
            GovernanceError::Storage(_) => ApiError::internal(message),
        }
    }
}

impl From<ContainerError> for ApiError {
    fn from(err: ContainerError) -> Self {
        let message = err.to_string();
        match err {
            ContainerError::InvalidPath(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_path", message)
            }
            ContainerError::InvalidInput(_) | ContainerError::ImageNotFound(_) => {
                ApiError::bad_request(message)
            }
            ContainerError::FileNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "file_not_found", message)
            }
            ContainerError::OutputTooLarge { limit } => {
                ApiError::new(StatusCode::BAD_REQUEST, "output_too_large", message)
                    .with_details(json!({ "limit": limit }))
            }
            ContainerError::Timeout { timeout_ms } => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "exec_timeout", message)
                    .with_details(json!({ "timeout_ms": timeout_ms }))
            }
            ContainerError::CommandFailed { exit_code, .. } => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "file_operation_failed", message)
                    .with_details(json!({ "exit_code": exit_code }))
            }
            ContainerError::ContainerNotFound(_)
            | ContainerError::NotRunning(_)
            | ContainerError::AlreadyExists(_)
            | ContainerError::Engine(_)
            | ContainerError::ParseError(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "container_error", message)
            }
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        let message = err.to_string();
        match err {
            ArchiveError::ArchiveNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "archive_not_found", message)
            }
            ArchiveError::Forbidden(_) => ApiError::forbidden(message),
            ArchiveError::InvalidProjectId(_) => ApiError::bad_request(message),
            ArchiveError::WorkspaceNotFound(_)
            | ArchiveError::Io(_)
            | ArchiveError::Zip(_)
            | ArchiveError::Storage(_)
            | ArchiveError::Task(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "archive_error", message)
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Governance(err) => err.into(),
            SessionError::Container(err) => err.into(),
            SessionError::Archive(err) => err.into(),
            SessionError::NotFound(id) => ApiError::not_found(format!("session not found: {id}")),
            SessionError::BadRequest(message) => ApiError::bad_request(message),
            SessionError::Storage(err) => ApiError::internal(format!("{err:#}")),
        }
    }
}

impl From<PreviewError> for ApiError {
    fn from(err: PreviewError) -> Self {
        let message = err.to_string();
        match err {
            PreviewError::Governance(err) => err.into(),
            PreviewError::Container(err) => err.into(),
            PreviewError::InvalidPort(port) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_port", message)
                    .with_details(json!({ "port": port }))
            }
            PreviewError::NotRegistered(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "preview_not_registered", message)
            }
            PreviewError::Unavailable { .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "preview_unavailable",
                message,
            ),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        ApiError::new(status, err.error_code(), err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governance_errors_map_to_statuses() {
        let gone: ApiError = GovernanceError::Gone {
            session_id: "s1".into(),
            reason: "idle_timeout".into(),
        }
        .into();
        assert_eq!(gone.status_code(), StatusCode::GONE);
        assert_eq!(gone.details().unwrap()["reason"], "idle_timeout");

        let busy: ApiError = GovernanceError::ConcurrencyLimit {
            in_flight: 2,
            limit: 2,
        }
        .into();
        assert_eq!(busy.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(busy.details().unwrap()["limit"], 2);

        let missing: ApiError = GovernanceError::NotFound("s1".into()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn container_errors_map_to_statuses() {
        let err: ApiError = ContainerError::InvalidPath("../x".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = ContainerError::Engine("socket closed".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: ApiError = ContainerError::FileNotFound("a.txt".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn preview_errors_map_to_statuses() {
        let err: ApiError = PreviewError::NotRegistered("s1".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = PreviewError::InvalidPort(80).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = PreviewError::Unavailable {
            session_id: "s1".into(),
            reason: "gone".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
