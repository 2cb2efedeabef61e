use serde::{Deserialize, Serialize};

/// Identity claims decoded from a verified ID token.
///
/// Lives in the request extensions for the duration of a single request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String, // uid
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub iss: String,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub auth_time: Option<usize>,
}

impl Claims {
    pub fn uid(&self) -> &str {
        &self.sub
    }
}
