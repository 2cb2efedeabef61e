mod common;

use ai_assistant_backend::config::AppConfig;
use ai_assistant_backend::services::auth::{AuthError, FirebaseTokenVerifier, TokenVerifier};
use ai_assistant_backend::services::credentials::{CredentialLoader, explicit_project_id};
use ai_assistant_backend::services::relay::StreamingRelay;
use ai_assistant_backend::services::upload_service::UploadService;
use ai_assistant_backend::{AppState, create_app};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::Engine;
use common::{FakeModel, MemoryStorage};
use http_body_util::BodyExt;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;

const PROJECT: &str = "demo-project";
const RSA_KEY: &[u8] = include_bytes!("fixtures/test_rsa_key.pem");
const JWKS: &str = include_str!("fixtures/test_jwks.json");
const SERVICE_ACCOUNT: &str = include_str!("fixtures/service_account.json");

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn verifier() -> FirebaseTokenVerifier {
    let keys: JwkSet = serde_json::from_str(JWKS).unwrap();
    FirebaseTokenVerifier::new(Some(PROJECT.to_string()), reqwest::Client::new()).with_keys(keys)
}

fn claims_for(project: &str) -> Value {
    json!({
        "sub": "firebase-uid-1",
        "email": "ada@example.com",
        "email_verified": true,
        "iss": format!("https://securetoken.google.com/{}", project),
        "aud": project,
        "iat": now() - 10,
        "exp": now() + 3600,
        "auth_time": now() - 10,
    })
}

fn sign(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_rsa_pem(RSA_KEY).unwrap()).unwrap()
}

async fn assert_rejected(token: &str) {
    match verifier().verify(token).await {
        Err(AuthError::InvalidToken(_)) => {}
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_valid_token_yields_claims() {
    let token = sign(&claims_for(PROJECT), "test-key");

    let claims = verifier().verify(&token).await.unwrap();
    assert_eq!(claims.uid(), "firebase-uid-1");
    assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
    assert_eq!(claims.aud, PROJECT);
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let mut claims = claims_for(PROJECT);
    claims["iat"] = json!(now() - 7200);
    claims["exp"] = json!(now() - 3600);
    assert_rejected(&sign(&claims, "test-key")).await;
}

#[tokio::test]
async fn test_token_for_another_project_is_rejected() {
    assert_rejected(&sign(&claims_for("other-project"), "test-key")).await;

    let mut claims = claims_for(PROJECT);
    claims["iss"] = json!("https://accounts.google.com");
    assert_rejected(&sign(&claims, "test-key")).await;
}

#[tokio::test]
async fn test_unknown_key_id_is_rejected() {
    assert_rejected(&sign(&claims_for(PROJECT), "rotated-away")).await;
}

/// Serves the fixture key set the way Google does and counts the requests.
async fn serve_jwks() -> (String, Arc<AtomicUsize>) {
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    let app = axum::Router::new().route(
        "/jwks",
        axum::routing::get(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                (
                    [
                        ("Cache-Control", "public, max-age=3600"),
                        ("Content-Type", "application/json"),
                    ],
                    JWKS,
                )
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{}/jwks", addr), fetches)
}

#[tokio::test]
async fn test_unknown_key_ids_do_not_refetch_fresh_keys() {
    let (url, fetches) = serve_jwks().await;
    let verifier = Arc::new(
        FirebaseTokenVerifier::new(Some(PROJECT.to_string()), reqwest::Client::new())
            .with_jwks_url(url),
    );

    let forged: Vec<String> = (0..20)
        .map(|i| sign(&claims_for(PROJECT), &format!("bogus-{}", i)))
        .collect();
    let results = futures::future::join_all(forged.iter().map(|t| verifier.verify(t))).await;
    assert!(results.iter().all(|r| matches!(r, Err(AuthError::InvalidToken(_)))));

    for token in &forged {
        assert!(verifier.verify(token).await.is_err());
    }

    let token = sign(&claims_for(PROJECT), "test-key");
    assert_eq!(verifier.verify(&token).await.unwrap().uid(), "firebase-uid-1");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tampered_or_symmetric_tokens_are_rejected() {
    let token = sign(&claims_for(PROJECT), "test-key");
    let (head, signature) = token.rsplit_once('.').unwrap();
    let flipped = if signature.starts_with('A') { "B" } else { "A" };
    assert_rejected(&format!("{}.{}{}", head, flipped, &signature[1..])).await;

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("test-key".to_string());
    let hs = encode(
        &header,
        &claims_for(PROJECT),
        &EncodingKey::from_secret(b"guessable"),
    )
    .unwrap();
    assert_rejected(&hs).await;

    assert_rejected("not-a-jwt").await;
}

#[tokio::test]
async fn test_empty_subject_is_rejected() {
    let mut claims = claims_for(PROJECT);
    claims["sub"] = json!("");
    assert_rejected(&sign(&claims, "test-key")).await;
}

#[tokio::test]
async fn test_verifier_without_project_fails_closed() {
    let keys: JwkSet = serde_json::from_str(JWKS).unwrap();
    let verifier = FirebaseTokenVerifier::new(None, reqwest::Client::new()).with_keys(keys);
    let token = sign(&claims_for(PROJECT), "test-key");
    assert!(verifier.verify(&token).await.is_err());
}

#[tokio::test]
async fn test_signed_token_opens_protected_route() {
    common::init_tracing();
    let staging = tempfile::tempdir().unwrap();
    let model = Arc::new(FakeModel::answering(&["hello"]));
    let state = AppState {
        verifier: Arc::new(verifier()),
        upload_service: Arc::new(UploadService::new(
            Arc::new(MemoryStorage::default()),
            model.clone(),
            staging.path().to_path_buf(),
            1024,
        )),
        relay: Arc::new(StreamingRelay::new(model, Duration::from_secs(5))),
        config: AppConfig::with_api_key("test-api-key"),
    };
    let app = create_app(state);

    let token = sign(&claims_for(PROJECT), "test-key");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ask")
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"question":"Hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello");

    let mut expired = claims_for(PROJECT);
    expired["exp"] = json!(now() - 3600);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ask")
                .header(
                    "Authorization",
                    format!("Bearer {}", sign(&expired, "test-key")),
                )
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"question":"Hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_explicit_credentials_resolve_without_network() {
    let encoded = base64::engine::general_purpose::STANDARD.encode(SERVICE_ACCOUNT);
    let loader = CredentialLoader::standard(
        Some(encoded.clone()),
        "does-not-exist.json".into(),
        reqwest::Client::new(),
    );
    assert!(loader.resolve().await.is_ok());

    let dir = tempfile::tempdir().unwrap();
    let key_file = dir.path().join("service-account.json");
    std::fs::write(&key_file, SERVICE_ACCOUNT).unwrap();
    let loader = CredentialLoader::standard(None, key_file.clone(), reqwest::Client::new());
    assert!(loader.resolve().await.is_ok());

    assert_eq!(
        explicit_project_id(Some(&encoded), Path::new("does-not-exist.json")).as_deref(),
        Some(PROJECT)
    );
    assert_eq!(explicit_project_id(None, &key_file).as_deref(), Some(PROJECT));
    assert_eq!(explicit_project_id(None, Path::new("does-not-exist.json")), None);
}
