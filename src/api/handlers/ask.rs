use crate::AppState;
use crate::api::error::AppError;
use crate::services::relay::{Question, into_body_stream};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, message = "question must not be empty"))]
    pub question: String,
    /// AI file reference returned by `/upload`.
    pub file_uri: Option<String>,
    pub mime_type: Option<String>,
}

#[utoipa::path(
    post,
    path = "/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer streamed as plain text; failures appear in-band as `Error: ...`", content_type = "text/plain", body = String),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "ai"
)]
pub async fn ask(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    tracing::info!(
        "💬 Question from user {} ({} chars, file: {})",
        claims.uid(),
        req.question.chars().count(),
        req.file_uri.as_deref().unwrap_or("none")
    );

    let events = state.relay.ask(
        Question {
            text: req.question,
            file_uri: req.file_uri,
            mime_type: req.mime_type,
        },
        &claims,
    );

    Ok((
        [
            (CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref()),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(into_body_stream(events)),
    )
        .into_response())
}
