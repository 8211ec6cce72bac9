//! JSON bodies shared by every route
//!
//! Success: `{"success": true, "message": ...}`.
//! Failure: `{"success": false, "error": ..., "code": "VAULT_..."}`.

use std::error::Error as StdError;

use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::service::ServiceError;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_restored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_deleted: Option<usize>,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            files_restored: None,
            rows_deleted: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self {
            success: false,
            error: err.message().to_string(),
            code: err.code(),
        }
    }
}

/// Log the full cause chain and build the client-safe reply.
pub fn error_reply(err: ServiceError) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let cause = cause_chain(&err);

    if status.is_server_error() {
        tracing::error!(code = err.code(), error = %err, cause = %cause, "request failed");
    } else {
        tracing::warn!(code = err.code(), error = %err, cause = %cause, "request rejected");
    }

    (status, Json(ErrorResponse::from(&err)))
}

fn cause_chain(err: &ServiceError) -> String {
    let mut parts = Vec::new();
    let mut current = StdError::source(err);
    while let Some(cause) = current {
        parts.push(cause.to_string());
        current = cause.source();
    }
    parts.join(": ")
}
