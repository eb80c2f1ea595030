//! Error types. Grounded on the teacher's `error.rs`: a `thiserror`-derived
//! enum whose conversion to a client response sanitizes internal detail
//! while still logging it server-side. The teacher targets
//! `async_graphql::Error` with an extension code; this surface is plain
//! JSON, so the same sanitize-then-log shape targets
//! `axum::response::IntoResponse` with a `{error, code}` body instead.
//!
//! Two enums, same split the teacher draws between request-time failures
//! and everything else: `ApiError` is per-request (spec §7's auth/
//! not-found/bad-request/internal cases); `AppError` is the fatal,
//! startup-only path (spec §7's "config errors ... fatal at startup",
//! §6's "non-zero on unrecoverable init failure"), mirroring the teacher's
//! own `ApiError::Config(#[from] anyhow::Error)` variant — a thin wrapper
//! around whatever `anyhow::Context` attached along the way — rather than
//! inventing a parallel hierarchy of config-specific error variants the
//! teacher never bothered with either.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Fatal failures during process startup (config load/validate, driver
/// config validation, socket bind). `main` returns this as its top-level
/// error type; any `Err` here exits the process with a non-zero code
/// before a single request has been served.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Config(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
        };
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
