//! Uniform error envelope for the HTTP API: every non-2xx
//! response body is `{ error: { kind, message, detail? } }`, with `kind`
//! drawn from [`crate::error::ObservatoryError::kind`].

use crate::error::ObservatoryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind,
                message: self.message,
                detail: self.detail,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ObservatoryError> for ApiError {
    fn from(err: ObservatoryError) -> Self {
        let status = match &err {
            ObservatoryError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ObservatoryError::RateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ObservatoryError::Upstream4xx { .. } | ObservatoryError::UpstreamRetryable(_) => StatusCode::BAD_GATEWAY,
            ObservatoryError::Parse(_) => StatusCode::BAD_GATEWAY,
            ObservatoryError::Storage(_) | ObservatoryError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ObservatoryError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ObservatoryError::Validation(_) => StatusCode::BAD_REQUEST,
            ObservatoryError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
            detail: None,
        }
    }
}

/// Anything falling through `anyhow` at the API boundary is opaque to the
/// caller: wrapped as `INTERNAL` with a correlation id for log lookup,
/// never leaking the underlying message.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let wrapped = ObservatoryError::internal(err);
        let correlation = match &wrapped {
            ObservatoryError::Internal { correlation_id, .. } => correlation_id.to_string(),
            _ => unreachable!(),
        };
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "INTERNAL",
            message: "internal error".to_string(),
            detail: Some(format!("correlation_id={correlation}")),
        }
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "VALIDATION",
            message: message.into(),
            detail: None,
        }
    }

    /// A missing resource is surfaced as `VALIDATION` rather than a
    /// distinct kind, keeping the error taxonomy closed to `VALIDATION`
    /// and the opaque `INTERNAL`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "VALIDATION",
            message: message.into(),
            detail: None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
