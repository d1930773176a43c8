use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            FeedError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            FeedError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        };
        let message = self.to_string();

        tracing::warn!(
            code = %code,
            status = %status.as_u16(),
            message = %message,
            "Status API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
