//! Application error types for the hub's HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::duration::DurationParseError;
use crate::services::RegistryError;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown chime: {0:?}")]
    UnknownChime(String),

    #[error("Chime {0:?} is not draining its queue")]
    QueueSaturated(String),
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownChime(name) => AppError::UnknownChime(name),
            RegistryError::QueueSaturated(name) => AppError::QueueSaturated(name),
            RegistryError::Serialization(e) => AppError::Serialization(e),
        }
    }
}

impl From<DurationParseError> for AppError {
    fn from(err: DurationParseError) -> Self {
        AppError::Validation(format!("Invalid duration: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Serialization error: {}", e),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnknownChime(name) => {
                (StatusCode::BAD_REQUEST, format!("Unknown chime: {:?}", name))
            }
            AppError::QueueSaturated(name) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Chime {:?} is not draining its queue", name),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_errors_map_to_status() {
        let unknown: AppError = RegistryError::UnknownChime("porch".into()).into();
        assert_eq!(unknown.into_response().status(), StatusCode::BAD_REQUEST);

        let full: AppError = RegistryError::QueueSaturated("porch".into()).into();
        assert_eq!(full.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
