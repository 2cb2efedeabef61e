use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_BUCKET: &str = "slipwake-online-41716";
pub const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "service-account.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GENAI_API_KEY is not set; refusing to start without an AI API key")]
    MissingApiKey,
}

/// Runtime configuration, resolved once at startup.
#[derive(Clone)]
pub struct AppConfig {
    /// Gemini API key (required)
    pub genai_api_key: String,

    /// Model used for `/ask` (default: "gemini-2.0-flash")
    pub genai_model: String,

    /// Gemini API base URL
    pub genai_base_url: String,

    /// Object-store bucket receiving the original uploads
    pub gcs_bucket: String,

    /// Base64-encoded service-account JSON (highest-priority credential source)
    pub google_credentials_base64: Option<String>,

    /// Local service-account file, used when present
    pub service_account_file: PathBuf,

    /// Audience expected in identity tokens. Falls back to the project of the
    /// explicit service-account credentials.
    pub firebase_project_id: Option<String>,

    /// Directory for staged uploads and derived artifacts
    pub upload_temp_dir: PathBuf,

    /// Maximum upload size in bytes (default: 100 MB)
    pub max_file_size: usize,

    /// Timeout for each outbound upload call (default: 300s)
    pub upload_timeout_secs: u64,

    /// Longest silence tolerated between streamed model fragments (default: 60s)
    pub stream_idle_timeout_secs: u64,
}

impl AppConfig {
    /// Defaults for everything except the API key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            genai_api_key: api_key.into(),
            genai_model: DEFAULT_MODEL.to_string(),
            genai_base_url: DEFAULT_GENAI_BASE_URL.to_string(),
            gcs_bucket: DEFAULT_BUCKET.to_string(),
            google_credentials_base64: None,
            service_account_file: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_FILE),
            firebase_project_id: None,
            upload_temp_dir: env::temp_dir(),
            max_file_size: 100 * 1024 * 1024, // 100 MB
            upload_timeout_secs: 300,
            stream_idle_timeout_secs: 60,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("GENAI_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        let default = Self::with_api_key(api_key);

        Ok(Self {
            genai_model: non_empty("GENAI_MODEL").unwrap_or(default.genai_model.clone()),

            genai_base_url: non_empty("GENAI_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default.genai_base_url.clone()),

            gcs_bucket: non_empty("GCS_BUCKET_NAME").unwrap_or(default.gcs_bucket.clone()),

            google_credentials_base64: non_empty("GOOGLE_CREDENTIALS_BASE64"),

            service_account_file: non_empty("GOOGLE_SERVICE_ACCOUNT_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.service_account_file.clone()),

            firebase_project_id: non_empty("FIREBASE_PROJECT_ID"),

            upload_temp_dir: non_empty("UPLOAD_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_temp_dir.clone()),

            max_file_size: non_empty("MAX_FILE_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            upload_timeout_secs: non_empty("UPLOAD_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.upload_timeout_secs),

            stream_idle_timeout_secs: non_empty("STREAM_IDLE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.stream_idle_timeout_secs),

            ..default
        })
    }
}
