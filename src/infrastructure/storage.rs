use crate::config::AppConfig;
use crate::services::credentials::CredentialLoader;
use crate::services::storage::GcsStorageService;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub fn setup_storage(config: &AppConfig, http: reqwest::Client) -> Arc<GcsStorageService> {
    let credentials = Arc::new(CredentialLoader::standard(
        config.google_credentials_base64.clone(),
        config.service_account_file.clone(),
        http.clone(),
    ));

    match (&config.google_credentials_base64, config.service_account_file.exists()) {
        (Some(_), _) => info!("🔑 Storage credentials: GOOGLE_CREDENTIALS_BASE64"),
        (None, true) => info!(
            "🔑 Storage credentials: {}",
            config.service_account_file.display()
        ),
        (None, false) => info!("🔑 Storage credentials: ambient defaults"),
    }
    info!("☁️  GCS Storage (Bucket: {})", config.gcs_bucket);

    Arc::new(GcsStorageService::new(
        http,
        config.gcs_bucket.clone(),
        credentials,
        Duration::from_secs(config.upload_timeout_secs),
    ))
}
