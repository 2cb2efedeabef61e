use crate::services::credentials::{AccessTokenProvider, CredentialLoader};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;

pub const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// Characters left untouched in public object URLs.
const OBJECT_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[async_trait]
pub trait StorageService: Send + Sync {
    /// Streams `size` bytes from `reader` to `key` and returns the object's public URL.
    async fn upload_stream(
        &self,
        key: &str,
        content_type: &str,
        size: u64,
        reader: Box<dyn AsyncRead + Unpin + Send + Sync>,
    ) -> Result<String>;

    fn public_url(&self, key: &str) -> String;
}

pub struct GcsStorageService {
    http: reqwest::Client,
    bucket: String,
    api_base: String,
    upload_timeout: Duration,
    credentials: Arc<CredentialLoader>,
    token_provider: OnceCell<Arc<dyn AccessTokenProvider>>,
}

impl GcsStorageService {
    pub fn new(
        http: reqwest::Client,
        bucket: String,
        credentials: Arc<CredentialLoader>,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            http,
            bucket,
            api_base: GCS_API_BASE.to_string(),
            upload_timeout,
            credentials,
            token_provider: OnceCell::new(),
        }
    }

    /// Resolves credentials on first use. A failed resolution is not cached,
    /// so the next upload walks the chain again.
    async fn token_provider(&self) -> Result<&Arc<dyn AccessTokenProvider>> {
        let provider = self
            .token_provider
            .get_or_try_init(|| self.credentials.resolve())
            .await?;
        Ok(provider)
    }
}

#[async_trait]
impl StorageService for GcsStorageService {
    async fn upload_stream(
        &self,
        key: &str,
        content_type: &str,
        size: u64,
        reader: Box<dyn AsyncRead + Unpin + Send + Sync>,
    ) -> Result<String> {
        let token = self
            .token_provider()
            .await?
            .access_token()
            .await
            .context("failed to obtain object-store access token")?;

        let url = format!("{}/upload/storage/v1/b/{}/o", self.api_base, self.bucket);
        let res = self
            .http
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(token)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .timeout(self.upload_timeout)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(reader)))
            .send()
            .await
            .with_context(|| format!("upload of {} failed", key))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(
                "GCS upload failed: bucket={}, key={}, status={}, body={}",
                self.bucket,
                key,
                status,
                body
            );
            return Err(anyhow!("object store rejected upload ({}): {}", status, body));
        }

        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.api_base,
            self.bucket,
            utf8_percent_encode(key, OBJECT_PATH)
        )
    }
}
