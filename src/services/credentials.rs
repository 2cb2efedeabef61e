//! Object-store credential resolution.
//!
//! Credentials come from an ordered chain of [`CredentialSource`]s. The first
//! source that yields a token provider wins; sources that are configured but
//! broken are logged and skipped.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const METADATA_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("object-store credentials unavailable: {0:#}")]
    Unavailable(#[source] anyhow::Error),
}

/// Something that can mint OAuth access tokens for the object store.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// One link of the credential chain.
///
/// `Ok(None)` means "not configured here"; `Err` means configured but unusable.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self) -> Result<Option<Arc<dyn AccessTokenProvider>>>;
}

pub struct CredentialLoader {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialLoader {
    pub fn new(sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    /// Base64 env blob, then local key file, then ambient credentials.
    pub fn standard(
        base64_credentials: Option<String>,
        service_account_file: PathBuf,
        http: reqwest::Client,
    ) -> Self {
        Self::new(vec![
            Box::new(Base64EnvSource::new(base64_credentials, http.clone())),
            Box::new(ServiceAccountFileSource::new(service_account_file, http.clone())),
            Box::new(AmbientSource::from_env(http)),
        ])
    }

    pub async fn resolve(&self) -> Result<Arc<dyn AccessTokenProvider>, CredentialError> {
        let mut last_error = None;

        for source in &self.sources {
            match source.load().await {
                Ok(Some(provider)) => {
                    info!("✅ Loaded object-store credentials from {}", source.name());
                    return Ok(provider);
                }
                Ok(None) => debug!("Credential source {} not configured", source.name()),
                Err(e) => {
                    error!("❌ Error loading credentials from {}: {:#}", source.name(), e);
                    last_error = Some(e.context(format!("{} failed", source.name())));
                }
            }
        }

        Err(CredentialError::Unavailable(
            last_error.unwrap_or_else(|| anyhow!("no credential source is configured")),
        ))
    }
}

/// A Google service-account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("service-account JSON is malformed")
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .context("credentials are not valid base64")?;
        let text = String::from_utf8(decoded).context("decoded credentials are not UTF-8")?;
        Self::from_json(text.as_bytes())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_json(&bytes)
    }
}

/// Project id of the explicitly configured service account, if any.
pub fn explicit_project_id(base64_credentials: Option<&str>, service_account_file: &Path) -> Option<String> {
    base64_credentials
        .and_then(|encoded| ServiceAccountKey::from_base64(encoded).ok())
        .or_else(|| {
            service_account_file
                .exists()
                .then(|| ServiceAccountKey::from_file(service_account_file).ok())
                .flatten()
        })
        .and_then(|key| key.project_id)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// Application-default credential files come in two flavours.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

impl CredentialsFile {
    fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("{} is not a supported credentials file", path.display()))
    }

    fn into_provider(self, http: reqwest::Client) -> Result<Arc<dyn AccessTokenProvider>> {
        let provider: Arc<dyn AccessTokenProvider> = match self {
            CredentialsFile::ServiceAccount(key) => {
                Arc::new(ServiceAccountTokenProvider::new(key, http)?)
            }
            CredentialsFile::AuthorizedUser(user) => {
                Arc::new(AuthorizedUserTokenProvider::new(user, http))
            }
        };
        Ok(provider)
    }
}

pub struct Base64EnvSource {
    encoded: Option<String>,
    http: reqwest::Client,
}

impl Base64EnvSource {
    pub fn new(encoded: Option<String>, http: reqwest::Client) -> Self {
        Self { encoded, http }
    }
}

#[async_trait]
impl CredentialSource for Base64EnvSource {
    fn name(&self) -> &'static str {
        "GOOGLE_CREDENTIALS_BASE64"
    }

    async fn load(&self) -> Result<Option<Arc<dyn AccessTokenProvider>>> {
        let Some(encoded) = self.encoded.as_deref() else {
            return Ok(None);
        };
        let key = ServiceAccountKey::from_base64(encoded)?;
        Ok(Some(Arc::new(ServiceAccountTokenProvider::new(
            key,
            self.http.clone(),
        )?)))
    }
}

pub struct ServiceAccountFileSource {
    path: PathBuf,
    http: reqwest::Client,
}

impl ServiceAccountFileSource {
    pub fn new(path: PathBuf, http: reqwest::Client) -> Self {
        Self { path, http }
    }
}

#[async_trait]
impl CredentialSource for ServiceAccountFileSource {
    fn name(&self) -> &'static str {
        "service-account file"
    }

    async fn load(&self) -> Result<Option<Arc<dyn AccessTokenProvider>>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let key = ServiceAccountKey::from_file(&self.path)?;
        Ok(Some(Arc::new(ServiceAccountTokenProvider::new(
            key,
            self.http.clone(),
        )?)))
    }
}

/// Whatever the hosting environment provides: an explicit
/// `GOOGLE_APPLICATION_CREDENTIALS` file, the gcloud user credentials, or the
/// compute metadata server.
pub struct AmbientSource {
    adc_file: Option<PathBuf>,
    well_known_file: Option<PathBuf>,
    metadata_host: String,
    http: reqwest::Client,
}

impl AmbientSource {
    pub fn new(
        adc_file: Option<PathBuf>,
        well_known_file: Option<PathBuf>,
        metadata_host: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            adc_file,
            well_known_file,
            metadata_host,
            http,
        }
    }

    pub fn from_env(http: reqwest::Client) -> Self {
        let adc_file = std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let well_known_file = std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home).join(".config/gcloud/application_default_credentials.json")
        });
        let metadata_host = std::env::var("GCE_METADATA_HOST")
            .unwrap_or_else(|_| "metadata.google.internal".to_string());
        Self::new(adc_file, well_known_file, metadata_host, http)
    }

    async fn metadata_server_available(&self) -> bool {
        let url = format!("http://{}/computeMetadata/v1/", self.metadata_host);
        match self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(res) => res
                .headers()
                .get("Metadata-Flavor")
                .is_some_and(|v| v == "Google"),
            Err(e) => {
                debug!("Metadata server unreachable: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl CredentialSource for AmbientSource {
    fn name(&self) -> &'static str {
        "ambient default credentials"
    }

    async fn load(&self) -> Result<Option<Arc<dyn AccessTokenProvider>>> {
        if let Some(path) = &self.adc_file {
            // An explicit path that cannot be used is an error, not a fallthrough
            return CredentialsFile::read(path)?
                .into_provider(self.http.clone())
                .map(Some);
        }

        if let Some(path) = self.well_known_file.as_deref().filter(|p| p.exists()) {
            return CredentialsFile::read(path)?
                .into_provider(self.http.clone())
                .map(Some);
        }

        if self.metadata_server_available().await {
            return Ok(Some(Arc::new(MetadataServerTokenProvider::new(
                self.metadata_host.clone(),
                self.http.clone(),
            ))));
        }

        Err(anyhow!(
            "no default credentials found (no GOOGLE_APPLICATION_CREDENTIALS, no gcloud credentials, metadata server unreachable)"
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Default)]
struct TokenCache(Mutex<Option<CachedToken>>);

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenResponse>>,
    {
        let mut slot = self.0.lock().await;
        if let Some(cached) = slot.as_ref().filter(|c| Instant::now() < c.refresh_at) {
            return Ok(cached.value.clone());
        }

        let fresh = fetch().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(REFRESH_MARGIN);
        *slot = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }
}

async fn read_token_response(res: reqwest::Response) -> Result<TokenResponse> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(anyhow!("token endpoint returned {}: {}", status, body));
    }
    res.json().await.context("token endpoint returned malformed JSON")
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges a signed JWT assertion for an access token.
pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http: reqwest::Client,
    cache: TokenCache,
}

impl ServiceAccountTokenProvider {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service-account private key is not a valid RSA PEM")?;
        Ok(Self {
            key,
            signing_key,
            http,
            cache: TokenCache::default(),
        })
    }

    #[cfg(test)]
    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn assertion(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: STORAGE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        encode(&header, &claims, &self.signing_key).context("failed to sign token assertion")
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.cache
            .get_or_fetch(|| async {
                let assertion = self.assertion()?;
                let res = self
                    .http
                    .post(&self.key.token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
                    .send()
                    .await
                    .context("token exchange request failed")?;
                read_token_response(res).await
            })
            .await
    }
}

/// Refreshes gcloud user credentials.
pub struct AuthorizedUserTokenProvider {
    user: AuthorizedUser,
    http: reqwest::Client,
    cache: TokenCache,
}

impl AuthorizedUserTokenProvider {
    pub fn new(user: AuthorizedUser, http: reqwest::Client) -> Self {
        Self {
            user,
            http,
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for AuthorizedUserTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.cache
            .get_or_fetch(|| async {
                let res = self
                    .http
                    .post(DEFAULT_TOKEN_URI)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", self.user.client_id.as_str()),
                        ("client_secret", self.user.client_secret.as_str()),
                        ("refresh_token", self.user.refresh_token.as_str()),
                    ])
                    .send()
                    .await
                    .context("token refresh request failed")?;
                read_token_response(res).await
            })
            .await
    }
}

/// Tokens for the service account attached to the compute instance.
pub struct MetadataServerTokenProvider {
    host: String,
    http: reqwest::Client,
    cache: TokenCache,
}

impl MetadataServerTokenProvider {
    pub fn new(host: String, http: reqwest::Client) -> Self {
        Self {
            host,
            http,
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for MetadataServerTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.cache
            .get_or_fetch(|| async {
                let url = format!(
                    "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
                    self.host
                );
                let res = self
                    .http
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .context("metadata token request failed")?;
                read_token_response(res).await
            })
            .await
    }
}
