pub mod gemini;
pub mod identity;
pub mod storage;

use std::time::Duration;

/// Shared outbound HTTP client. Per-call timeouts are set by each service.
pub fn build_http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}
