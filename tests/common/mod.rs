#![allow(dead_code)]

use ai_assistant_backend::config::AppConfig;
use ai_assistant_backend::services::auth::{AuthError, TokenVerifier};
use ai_assistant_backend::services::gemini::{
    Content, GeminiError, GeminiFile, GenerativeModel, TextStream,
};
use ai_assistant_backend::services::relay::StreamingRelay;
use ai_assistant_backend::services::storage::StorageService;
use ai_assistant_backend::services::upload_service::UploadService;
use ai_assistant_backend::utils::auth::Claims;
use ai_assistant_backend::{AppState, create_app};
use async_trait::async_trait;
use axum::Router;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const VALID_TOKEN: &str = "valid-token";
pub const TEST_UID: &str = "user-123";
pub const BOUNDARY: &str = "---------------------------123456789012345678901234567";

pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("ai_assistant_backend=debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Accepts exactly one token and counts how often it was consulted.
#[derive(Default)]
pub struct FakeVerifier {
    pub calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if token != VALID_TOKEN {
            return Err(AuthError::InvalidToken("unknown token".to_string()));
        }
        Ok(Claims {
            sub: TEST_UID.to_string(),
            email: Some("user@example.com".to_string()),
            email_verified: Some(true),
            name: None,
            picture: None,
            iss: "https://securetoken.google.com/demo-project".to_string(),
            aud: "demo-project".to_string(),
            exp: usize::MAX,
            iat: 0,
            auth_time: None,
        })
    }
}

pub struct StoredObject {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub fail: bool,
}

impl MemoryStorage {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn upload_stream(
        &self,
        key: &str,
        content_type: &str,
        size: u64,
        mut reader: Box<dyn AsyncRead + Unpin + Send + Sync>,
    ) -> anyhow::Result<String> {
        if self.fail {
            return Err(anyhow::anyhow!("bucket is unavailable"));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        assert_eq!(data.len() as u64, size);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://storage.googleapis.com/test-bucket/{}", key)
    }
}

pub struct ModelUpload {
    pub mime_type: String,
    pub display_name: String,
    pub data: Vec<u8>,
}

/// Records uploads and questions; answers with a fixed list of fragments,
/// optionally followed by an error.
#[derive(Default)]
pub struct FakeModel {
    pub uploads: Mutex<Vec<ModelUpload>>,
    pub questions: Mutex<Vec<Vec<Content>>>,
    pub fragments: Vec<String>,
    pub trailing_error: Option<String>,
    pub fail_uploads: bool,
}

impl FakeModel {
    pub fn answering(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_after(fragments: &[&str], error: &str) -> Self {
        Self {
            trailing_error: Some(error.to_string()),
            ..Self::answering(fragments)
        }
    }

    pub fn rejecting_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl GenerativeModel for FakeModel {
    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<GeminiFile, GeminiError> {
        if self.fail_uploads {
            return Err(GeminiError::Api {
                status: 503,
                message: "file service unavailable".to_string(),
            });
        }
        let data = tokio::fs::read(path).await?;
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(ModelUpload {
            mime_type: mime_type.to_string(),
            display_name: display_name.to_string(),
            data,
        });
        let name = format!("files/test-{}", uploads.len());
        Ok(GeminiFile {
            uri: format!("https://generativelanguage.googleapis.com/v1beta/{}", name),
            name,
            mime_type: mime_type.to_string(),
        })
    }

    async fn stream_generate(&self, contents: Vec<Content>) -> Result<TextStream, GeminiError> {
        self.questions.lock().unwrap().push(contents);
        let mut items: Vec<Result<String, GeminiError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.trailing_error {
            items.push(Err(GeminiError::Api {
                status: 500,
                message: message.clone(),
            }));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

pub struct TestApp {
    pub app: Router,
    pub verifier: Arc<FakeVerifier>,
    pub storage: Arc<MemoryStorage>,
    pub model: Arc<FakeModel>,
    pub staging: tempfile::TempDir,
}

impl TestApp {
    pub fn new(storage: MemoryStorage, model: FakeModel) -> Self {
        Self::with_max_file_size(storage, model, None)
    }

    pub fn with_max_file_size(
        storage: MemoryStorage,
        model: FakeModel,
        max_file_size: Option<usize>,
    ) -> Self {
        init_tracing();
        let staging = tempfile::tempdir().unwrap();
        let verifier = Arc::new(FakeVerifier::default());
        let storage = Arc::new(storage);
        let model = Arc::new(model);

        let mut config = AppConfig::with_api_key("test-api-key");
        config.upload_temp_dir = staging.path().to_path_buf();
        if let Some(max) = max_file_size {
            config.max_file_size = max;
        }

        let state = AppState {
            verifier: verifier.clone(),
            upload_service: Arc::new(UploadService::new(
                storage.clone(),
                model.clone(),
                staging.path().to_path_buf(),
                config.max_file_size as u64,
            )),
            relay: Arc::new(StreamingRelay::new(model.clone(), Duration::from_secs(5))),
            config,
        };

        Self {
            app: create_app(state),
            verifier,
            storage,
            model,
            staging,
        }
    }

    /// Files left behind in the staging directory.
    pub fn staged_files(&self) -> Vec<String> {
        std::fs::read_dir(self.staging.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

/// A single-field multipart body.
pub fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{boundary}\r\n\
        Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
        Content-Type: {content_type}\r\n\r\n",
        boundary = BOUNDARY,
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}
