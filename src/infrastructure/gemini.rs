use crate::config::AppConfig;
use crate::services::gemini::GeminiClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub fn setup_gemini(config: &AppConfig, http: reqwest::Client) -> Arc<GeminiClient> {
    let client = GeminiClient::new(
        http,
        config.genai_api_key.clone(),
        config.genai_base_url.trim_end_matches('/').to_string(),
        config.genai_model.clone(),
        Duration::from_secs(config.upload_timeout_secs),
    );
    info!("🤖 AI model: {} ({})", client.model(), config.genai_base_url);
    Arc::new(client)
}
