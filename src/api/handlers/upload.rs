use crate::AppState;
use crate::api::error::AppError;
use crate::services::upload_service::UploadOutcome;
use crate::utils::auth::Claims;
use crate::utils::validation::sanitize_filename;
use axum::{
    Extension, Json,
    extract::{Multipart, State, multipart::MultipartError},
};
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// Always `"success"`.
    pub status: String,
    pub filename: String,
    /// Public object-store URL of the original bytes.
    pub url: String,
    /// AI file reference to pass back to `/ask`.
    pub gemini_uri: String,
    pub mime_type: String,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        Self {
            status: "success".to_string(),
            filename: outcome.filename,
            url: outcome.url,
            gemini_uri: outcome.gemini_uri,
            mime_type: outcome.mime_type,
        }
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    let msg = e.to_string();
    if msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(msg)
    }
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = Multipart, description = "File upload in the `file` field"),
    responses(
        (status = 200, description = "File uploaded successfully", body = UploadResponse),
        (status = 400, description = "No file provided"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Upload failed")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "files"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let result: Result<Json<UploadResponse>, AppError> = async {
        let mut outcome = None;

        while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some("file") || outcome.is_some() {
                while field.chunk().await.map_err(multipart_error)?.is_some() {}
                continue;
            }

            let filename = sanitize_filename(field.file_name().unwrap_or_default());
            let content_type = field.content_type().map(|s| s.to_string());
            tracing::info!("📦 Receiving {} from user {}", filename, claims.uid());

            let reader = StreamReader::new(field.map_err(std::io::Error::other));
            outcome = Some(
                state
                    .upload_service
                    .handle_upload(reader, &filename, content_type.as_deref(), &claims)
                    .await?,
            );
        }

        let outcome = outcome.ok_or(AppError::BadRequest("No file provided".to_string()))?;
        Ok(Json(outcome.into()))
    }
    .await;

    if let Err(e) = &result {
        // Drain the rest of the body before responding
        tracing::warn!("Upload failed early: {}. Consuming remaining stream...", e);
        while let Ok(Some(mut field)) = multipart.next_field().await {
            while let Ok(Some(_)) = field.chunk().await {}
        }
    }
    result
}
