use crate::config::AppConfig;
use crate::services::auth::FirebaseTokenVerifier;
use crate::services::credentials::explicit_project_id;
use std::sync::Arc;
use tracing::{info, warn};

/// Token verifier for the configured Firebase project.
///
/// Without a project id every token is rejected.
pub fn setup_verifier(config: &AppConfig, http: reqwest::Client) -> Arc<FirebaseTokenVerifier> {
    let project_id = config.firebase_project_id.clone().or_else(|| {
        explicit_project_id(
            config.google_credentials_base64.as_deref(),
            &config.service_account_file,
        )
    });

    match &project_id {
        Some(id) => info!("🪪 Verifying identity tokens for project {}", id),
        None => warn!(
            "⚠️  No FIREBASE_PROJECT_ID and no project in service-account credentials; all authenticated routes will return 401"
        ),
    }

    Arc::new(FirebaseTokenVerifier::new(project_id, http))
}
