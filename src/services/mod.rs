pub mod auth;
pub mod credentials;
pub mod gemini;
pub mod normalizer;
pub mod relay;
pub mod storage;
pub mod upload_service;
