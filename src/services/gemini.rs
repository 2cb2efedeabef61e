use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_LENGTH;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_EVENT_LINE: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("request to AI service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response from AI service: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response from model for {0:?}")]
    Timeout(Duration),
}

/// A file accepted by the AI file service.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFile {
    #[serde(default)]
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    #[serde(rename_all = "camelCase")]
    FileData {
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        file_uri: String,
    },
}

pub type TextStream = BoxStream<'static, Result<String, GeminiError>>;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<GeminiFile, GeminiError>;

    /// Opens a streamed generation; each item is the text of one response chunk.
    async fn stream_generate(&self, contents: Vec<Content>) -> Result<TextStream, GeminiError>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    upload_timeout: Duration,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        api_key: String,
        base_url: String,
        model: String,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_key,
            base_url,
            model,
            upload_timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: GeminiFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parses one line of the server-sent event stream.
///
/// Returns `Ok(None)` for blank lines, comments and chunks that carry no text.
fn parse_event_line(line: &str) -> Result<Option<String>, GeminiError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let chunk: GenerateContentResponse =
        serde_json::from_str(data).map_err(|e| GeminiError::Decode(e.to_string()))?;
    if let Some(err) = chunk.error {
        return Err(GeminiError::Api {
            status: err.code.unwrap_or(500),
            message: err.message,
        });
    }

    let text = chunk.text();
    Ok((!text.is_empty()).then_some(text))
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, GeminiError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(GeminiError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<GeminiFile, GeminiError> {
        let size = tokio::fs::metadata(path).await?.len();

        // 1. Open a resumable upload session
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size)
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .timeout(self.upload_timeout)
            .send()
            .await?;
        let start = ensure_success(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GeminiError::Decode("missing x-goog-upload-url header".to_string()))?
            .to_string();

        // 2. Send the bytes and finalize in one request
        let file = tokio::fs::File::open(path).await?;
        let res = self
            .http
            .post(upload_url)
            .header(CONTENT_LENGTH, size)
            .header("X-Goog-Upload-Offset", 0)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .timeout(self.upload_timeout)
            .body(reqwest::Body::from(file))
            .send()
            .await?;
        let res = ensure_success(res).await?;

        let envelope: FileEnvelope = res
            .json()
            .await
            .map_err(|e| GeminiError::Decode(e.to_string()))?;
        tracing::debug!(
            "AI service accepted {} as {} ({})",
            display_name,
            envelope.file.uri,
            envelope.file.mime_type
        );
        Ok(envelope.file)
    }

    async fn stream_generate(&self, contents: Vec<Content>) -> Result<TextStream, GeminiError> {
        let res = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:streamGenerateContent",
                self.base_url, self.model
            ))
            .query(&[("alt", "sse")])
            .header(API_KEY_HEADER, &self.api_key)
            .json(&GenerateContentRequest { contents })
            .send()
            .await?;
        let res = ensure_success(res).await?;

        let bytes = res.bytes_stream().map(|r| r.map_err(std::io::Error::other));
        let lines = FramedRead::new(
            StreamReader::new(bytes),
            LinesCodec::new_with_max_length(MAX_EVENT_LINE),
        );

        let texts = lines.filter_map(|line| async move {
            match line {
                Ok(line) => parse_event_line(&line).transpose(),
                Err(e) => Some(Err(GeminiError::Decode(e.to_string()))),
            }
        });
        Ok(texts.boxed())
    }
}
