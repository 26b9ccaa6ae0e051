use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm_client::CompletionError;
use crate::pipeline::outcome::StageError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream rejected the request (status {status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Upstream returned an unusable payload: {0}")]
    UpstreamInvalidPayload(String),

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String, raw: String },

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// `Json` body extractor whose rejections use the `AppError` envelope.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<StageError> for AppError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::Upstream(CompletionError::Unavailable(msg)) => {
                AppError::UpstreamUnavailable(msg)
            }
            StageError::Upstream(CompletionError::Rejected { status, message }) => {
                AppError::UpstreamRejected { status, message }
            }
            StageError::Upstream(CompletionError::InvalidPayload(msg)) => {
                AppError::UpstreamInvalidPayload(msg)
            }
            StageError::Malformed(e) => AppError::MalformedResponse {
                raw: e.raw().to_string(),
                message: e.to_string(),
            },
            StageError::Encode(e) => AppError::Internal(e.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UpstreamUnavailable(msg) => {
                tracing::error!("Completion service unavailable: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_UNAVAILABLE",
                    "The completion service could not be reached".to_string(),
                )
            }
            // The upstream message is what the user needs to fix their request
            AppError::UpstreamRejected { status, message } => {
                tracing::warn!("Completion service rejected request ({status}): {message}");
                (StatusCode::BAD_GATEWAY, "UPSTREAM_REJECTED", message.clone())
            }
            AppError::UpstreamInvalidPayload(msg) => {
                tracing::error!("Unusable completion payload: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_INVALID_PAYLOAD",
                    "The completion service returned an unusable payload".to_string(),
                )
            }
            AppError::MalformedResponse { message, .. } => {
                tracing::warn!("Malformed completion: {message}");
                (
                    StatusCode::BAD_GATEWAY,
                    "MALFORMED_RESPONSE",
                    message.clone(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let AppError::MalformedResponse { raw, .. } = &self {
            error["raw"] = json!(raw);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
