use crate::utils::auth::Claims;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::header::{CACHE_CONTROL, HeaderMap};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Google's published signing keys for Firebase ID tokens.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
pub const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

const DEFAULT_KEYS_TTL: Duration = Duration::from_secs(60 * 60);
/// An unknown `kid` triggers at most one refresh per interval.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CLOCK_SKEW_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token header")]
    InvalidHeader,

    #[error("Invalid or expired token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Message safe to return to the client.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidHeader => "Invalid token header",
            AuthError::InvalidToken(_) => "Invalid or expired token",
        }
    }
}

fn reject(reason: impl ToString) -> AuthError {
    AuthError::InvalidToken(reason.to_string())
}

/// Extracts the credential from an `Authorization` header value.
///
/// Anything other than `Bearer <token>` fails here, before any identity
/// service is consulted.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidHeader)
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

struct CachedKeys {
    set: JwkSet,
    expires_at: Option<Instant>,
    fetched_at: Instant,
}

enum Lookup {
    Found(DecodingKey),
    Unknown,
    Refresh,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }

    fn lookup(&self, kid: &str, pinned: bool) -> Result<Lookup, AuthError> {
        if !pinned && !self.is_fresh() {
            return Ok(Lookup::Refresh);
        }
        if let Some(jwk) = self.set.find(kid) {
            return DecodingKey::from_jwk(jwk).map(Lookup::Found).map_err(reject);
        }
        // Unknown kid: refresh at most once per interval
        if pinned || self.fetched_at.elapsed() < MIN_REFRESH_INTERVAL {
            Ok(Lookup::Unknown)
        } else {
            Ok(Lookup::Refresh)
        }
    }
}

fn unknown_key(kid: &str) -> AuthError {
    reject(format!("unknown signing key '{}'", kid))
}

/// Verifies Firebase ID tokens against Google's rotating key set.
pub struct FirebaseTokenVerifier {
    project_id: Option<String>,
    http: reqwest::Client,
    jwks_url: String,
    keys: RwLock<Option<CachedKeys>>,
    pinned: bool,
}

impl FirebaseTokenVerifier {
    pub fn new(project_id: Option<String>, http: reqwest::Client) -> Self {
        Self {
            project_id,
            http,
            jwks_url: FIREBASE_JWKS_URL.to_string(),
            keys: RwLock::new(None),
            pinned: false,
        }
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    /// Uses a fixed key set and never contacts the key endpoint.
    pub fn with_keys(mut self, set: JwkSet) -> Self {
        self.keys = RwLock::new(Some(CachedKeys {
            set,
            expires_at: None,
            fetched_at: Instant::now(),
        }));
        self.pinned = true;
        self
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(cached) = self.keys.read().await.as_ref() {
            match cached.lookup(kid, self.pinned)? {
                Lookup::Found(key) => return Ok(key),
                Lookup::Unknown => return Err(unknown_key(kid)),
                Lookup::Refresh => {}
            }
        }
        if self.pinned {
            return Err(unknown_key(kid));
        }

        // Single flight: whoever waited on the lock sees the new set
        let mut cache = self.keys.write().await;
        if let Some(cached) = cache.as_ref() {
            match cached.lookup(kid, false)? {
                Lookup::Found(key) => return Ok(key),
                Lookup::Unknown => return Err(unknown_key(kid)),
                Lookup::Refresh => {}
            }
        }

        let fetched = self.fetch_keys().await?;
        let key = fetched.set.find(kid).map(DecodingKey::from_jwk).transpose();
        *cache = Some(fetched);
        key.map_err(reject)?.ok_or_else(|| unknown_key(kid))
    }

    async fn fetch_keys(&self) -> Result<CachedKeys, AuthError> {
        debug!("Refreshing identity signing keys from {}", self.jwks_url);
        let res = self
            .http
            .get(&self.jwks_url)
            .timeout(JWKS_FETCH_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| reject(format!("could not fetch signing keys: {}", e)))?;

        let ttl = max_age(res.headers()).unwrap_or(DEFAULT_KEYS_TTL);
        let set: JwkSet = res
            .json()
            .await
            .map_err(|e| reject(format!("malformed signing keys: {}", e)))?;

        info!("🔐 Loaded {} identity signing keys (ttl {:?})", set.keys.len(), ttl);
        Ok(CachedKeys {
            set,
            expires_at: Some(Instant::now() + ttl),
            fetched_at: Instant::now(),
        })
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let project_id = self
            .project_id
            .as_deref()
            .ok_or_else(|| reject("identity project is not configured"))?;

        let header = decode_header(token).map_err(reject)?;
        if header.alg != Algorithm::RS256 {
            return Err(reject(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| reject("token has no key id"))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_SKEW_SECS;
        validation.set_audience(&[project_id]);
        validation.set_issuer(&[format!("{}{}", FIREBASE_ISSUER_PREFIX, project_id)]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let claims = decode::<Claims>(token, &key, &validation)
            .map_err(reject)?
            .claims;

        if claims.sub.is_empty() {
            return Err(reject("token has an empty subject"));
        }
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if claims.iat as u64 > now + CLOCK_SKEW_SECS {
            return Err(reject("token issued in the future"));
        }

        Ok(claims)
    }
}

fn max_age(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|directive| directive.trim().strip_prefix("max-age=")?.parse().ok())
        .map(Duration::from_secs)
}
