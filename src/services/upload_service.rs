use crate::services::gemini::{GeminiError, GenerativeModel};
use crate::services::normalizer::{
    DerivedArtifact, NormalizeError, Normalized, normalize_off_thread,
};
use crate::services::storage::StorageService;
use crate::utils::auth::Claims;
use crate::utils::validation::extension_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),

    #[error("file exceeds the maximum size of {0} bytes")]
    TooLarge(u64),

    #[error("conversion failed: {0}")]
    Conversion(#[from] NormalizeError),

    #[error("object store upload failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("AI file upload failed: {0}")]
    Ai(#[from] GeminiError),
}

/// Remote references produced by a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub filename: String,
    pub url: String,
    pub gemini_uri: String,
    pub mime_type: String,
}

/// Object key for a user's upload: `users/<uid>/<filename>`.
pub fn object_key(uid: &str, filename: &str) -> String {
    format!("users/{}/{}", uid, filename)
}

/// Best-effort removal of everything a request left on local disk.
fn finish(staged: TempPath, derived: Option<DerivedArtifact>) {
    if let Some(derived) = derived {
        derived.remove();
    }
    let staged_path = staged.to_path_buf();
    if let Err(e) = staged.close() {
        warn!("Failed to remove staged upload {}: {}", staged_path.display(), e);
    }
}

pub struct UploadService {
    storage: Arc<dyn StorageService>,
    model: Arc<dyn GenerativeModel>,
    staging_dir: PathBuf,
    max_file_size: u64,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn StorageService>,
        model: Arc<dyn GenerativeModel>,
        staging_dir: PathBuf,
        max_file_size: u64,
    ) -> Self {
        Self {
            storage,
            model,
            staging_dir,
            max_file_size,
        }
    }

    /// Stages `reader`, converts spreadsheets, and forwards the file to the
    /// object store and the AI file service.
    ///
    /// Local files are gone by the time this returns, whatever the outcome.
    /// If the future is dropped midway, the guards remove them instead.
    pub async fn handle_upload<R>(
        &self,
        reader: R,
        filename: &str,
        content_type: Option<&str>,
        claims: &Claims,
    ) -> Result<UploadOutcome, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let extension = extension_of(filename);
        let declared_mime = content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let staged = self.stage(reader, &extension).await.inspect_err(|e| {
            error!("❌ Staging failed for {} (user {}): {}", filename, claims.uid(), e);
        })?;
        debug!("Staged {} at {}", filename, staged.display());

        let mut derived = None;
        let result = self
            .forward(&staged, &mut derived, filename, &extension, declared_mime, claims)
            .await;

        finish(staged, derived);

        match &result {
            Ok(outcome) => info!(
                "✅ Uploaded {} for user {} ({})",
                filename,
                claims.uid(),
                outcome.mime_type
            ),
            Err(e) => error!("❌ Upload of {} for user {} failed: {}", filename, claims.uid(), e),
        }
        result
    }

    async fn stage<R>(&self, reader: R, extension: &str) -> Result<TempPath, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let suffix = if extension.is_empty() {
            String::new()
        } else {
            format!(".{}", extension)
        };
        let (file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(&self.staging_dir)?
            .into_parts();

        let mut file = tokio::fs::File::from_std(file);
        let mut limited = reader.take(self.max_file_size.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file).await?;
        if written > self.max_file_size {
            return Err(UploadError::TooLarge(self.max_file_size));
        }
        file.flush().await?;

        Ok(path)
    }

    async fn forward(
        &self,
        staged: &Path,
        derived: &mut Option<DerivedArtifact>,
        filename: &str,
        extension: &str,
        declared_mime: &str,
        claims: &Claims,
    ) -> Result<UploadOutcome, UploadError> {
        // 1. Normalize
        let Normalized {
            path: working_path,
            mime_type: working_mime,
            artifact,
        } = normalize_off_thread(
            staged.to_path_buf(),
            extension.to_string(),
            declared_mime.to_string(),
        )
        .await?;
        *derived = artifact;

        // 2. Original bytes to the object store
        let key = object_key(claims.uid(), filename);
        let file = tokio::fs::File::open(staged).await?;
        let size = file.metadata().await?.len();
        let url = self
            .storage
            .upload_stream(&key, declared_mime, size, Box::new(file))
            .await
            .map_err(UploadError::Storage)?;

        // 3. Working copy to the AI file service
        let remote = self
            .model
            .upload_file(&working_path, &working_mime, filename)
            .await?;

        let mime_type = if remote.mime_type.is_empty() {
            working_mime
        } else {
            remote.mime_type
        };

        Ok(UploadOutcome {
            filename: filename.to_string(),
            url,
            gemini_uri: remote.uri,
            mime_type,
        })
    }
}
