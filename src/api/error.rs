//! API error types and helpers.
//!
//! # Purpose
//! Centralizes HTTP error response construction so every endpoint returns
//! the same error shape and the engine's error kinds map to one status
//! code each.
use crate::api::types::ErrorResponse;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn build(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

pub fn api_not_found(message: &str) -> ApiError {
    build(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn api_conflict(message: &str) -> ApiError {
    build(StatusCode::CONFLICT, "conflict", message)
}

pub fn api_validation_error(message: &str) -> ApiError {
    build(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", message)
}

pub fn api_unauthorized(message: &str) -> ApiError {
    build(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

pub fn api_forbidden(message: &str) -> ApiError {
    build(StatusCode::FORBIDDEN, "forbidden", message)
}

pub fn api_unavailable(message: &str) -> ApiError {
    build(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
}

pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "broker storage error");
    build(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_internal_message(message: &str) -> ApiError {
    build(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}
