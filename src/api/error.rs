//! HTTP error mapping.
//!
//! Every error body has the shape
//! `{"status": <code>, "error": {"type": ..., "title": ..., "detail": ...}}`.

use std::any::Any;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::backend::RegistryError;
use crate::bot::EnqueueError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid api key")]
    PermissionMissing,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("update queue unavailable: {0}")]
    QueueUnavailable(#[from] EnqueueError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => ApiError::NotFound(format!("chat model {id} not found")),
            RegistryError::NoModelConfigured => ApiError::NotFound("no chat model configured".into()),
            RegistryError::Storage(e) => ApiError::Storage(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn error_response(status: StatusCode, kind: &'static str, title: &'static str, detail: Option<String>) -> Response {
    let body = ErrorBody { status: status.as_u16(), error: ErrorDetail { kind, title, detail } };
    (status, Json(body)).into_response()
}

/// Fixed body for anything unexpected; internals stay in the logs.
pub fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "InternalServerError",
        "Something went wrong!",
        None,
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::PermissionMissing => error_response(
                StatusCode::FORBIDDEN,
                "PermissionMissing",
                "Permission required for this action",
                Some("Valid BOT-API-KEY header required".into()),
            ),
            ApiError::NotFound(detail) => {
                error_response(StatusCode::NOT_FOUND, "NotFound", "Resource not found", Some(detail))
            }
            ApiError::BadRequest(detail) => {
                error_response(StatusCode::BAD_REQUEST, "BadRequest", "Invalid request", Some(detail))
            }
            ApiError::QueueUnavailable(e) => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "ServiceUnavailable",
                "Bot is not accepting updates",
                Some(e.to_string()),
            ),
            ApiError::Storage(e) => {
                error!("storage failure while serving request: {e}");
                internal_error()
            }
        }
    }
}

/// `CatchPanicLayer` hook.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("request handler panicked: {detail}");
    internal_error()
}
