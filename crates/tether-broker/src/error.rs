//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use tether_core::Error as CoreError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Optional request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// HTTP API error with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response for authorization failures.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Returns an error response for missing records.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns a retryable conflict (no-fit, lost race, contention).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id;
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
                request_id: request_id.clone(),
            }),
        )
            .into_response();

        if let Some(request_id) = request_id {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
        }

        response
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidQuantity(message) | CoreError::InvalidInput(message) => {
                Self::bad_request(message)
            }
            CoreError::Unauthenticated(message) => Self::unauthorized(message),
            e @ CoreError::IdentityMismatch { .. } => Self::forbidden(e.to_string()),
            e @ CoreError::NotFound { .. } => Self::not_found(e.to_string()),
            e @ (CoreError::NoSuitableCluster(_)
            | CoreError::InsufficientResources { .. }
            | CoreError::LockContended { .. }
            | CoreError::Conflict { .. }) => Self::conflict(e.to_string()),
            CoreError::Storage { message, .. }
            | CoreError::Serialization { message }
            | CoreError::Internal { message } => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_protocol_status_codes() {
        let cases = [
            (
                CoreError::InvalidQuantity("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoreError::Unauthenticated("no identity".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                CoreError::IdentityMismatch {
                    advertised: "c1".into(),
                    authenticated: "c2".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                CoreError::not_found("advertisement", "c9-adv"),
                StatusCode::NOT_FOUND,
            ),
            (
                CoreError::NoSuitableCluster("nothing fits".into()),
                StatusCode::CONFLICT,
            ),
            (
                CoreError::InsufficientResources {
                    cluster_id: "c2".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                CoreError::LockContended {
                    cluster_id: "c2".into(),
                    attempts: 5,
                },
                StatusCode::CONFLICT,
            ),
            (CoreError::storage("backend down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            let api: ApiError = error.into();
            assert_eq!(api.status(), expected);
        }
    }

    #[test]
    fn response_carries_request_id_header() {
        let response = ApiError::conflict("busy")
            .with_request_id("req-1")
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get("x-request-id").unwrap().to_str().unwrap(),
            "req-1"
        );
    }
}
