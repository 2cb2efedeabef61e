use crate::services::auth::AuthError;
use crate::services::upload_service::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthenticated(#[from] AuthError),

    #[error("Upload failed: {0}")]
    UploadFailed(#[from] UploadError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::Unauthenticated(e) => (StatusCode::UNAUTHORIZED, e.public_message().to_string()),
            AppError::UploadFailed(UploadError::TooLarge(limit)) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File exceeds the maximum size of {} bytes", limit),
            ),
            AppError::UploadFailed(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
        };

        let body = Json(json!({
            "detail": detail
        }));

        (status, body).into_response()
    }
}
