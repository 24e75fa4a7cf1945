//! HTTP mapping of registry failures.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mls_registry::RegistryError;
use tracing::error;

use crate::api_types::ErrorResponse;

#[derive(Debug)]
pub enum ApiError {
    Registry(RegistryError),
    /// Request shape is wrong (bad JSON, bad path id).
    Unprocessable(String),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Unprocessable(e.body_text())
    }
}

pub fn status_for(e: &RegistryError) -> StatusCode {
    match e {
        RegistryError::MalformedPayload(_) | RegistryError::InvalidSemver(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RegistryError::DraftEmpty | RegistryError::CodeInvalidOrExpired => StatusCode::BAD_REQUEST,
        RegistryError::UnauthorizedDevice => StatusCode::UNAUTHORIZED,
        RegistryError::Forbidden => StatusCode::FORBIDDEN,
        RegistryError::StrategyNotFound(_)
        | RegistryError::DeviceNotFound(_)
        | RegistryError::UnknownVersion { .. } => StatusCode::NOT_FOUND,
        RegistryError::DuplicateVersion { .. } => StatusCode::CONFLICT,
        RegistryError::Signing(_) | RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Registry(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!(error = %e, "request failed");
                }
                (
                    status,
                    ErrorResponse {
                        error: e.code().to_string(),
                        detail: e.to_string(),
                    },
                )
            }
            ApiError::Unprocessable(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: "INVALID_REQUEST".to_string(),
                    detail,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}
