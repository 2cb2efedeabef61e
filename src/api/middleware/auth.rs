use crate::AppState;
use crate::api::error::AppError;
use crate::services::auth::bearer_token;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

/// Verifies the bearer credential once and exposes the caller's `Claims`
/// to the handler through request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let target = format!("{} {}", req.method(), req.uri().path());

    let token = bearer_token(
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok()),
    )
    .map(|t| t.to_string())
    .inspect_err(|_| tracing::warn!("🔒 Rejected {}: malformed authorization header", target))?;

    let claims = state
        .verifier
        .verify(&token)
        .await
        .inspect_err(|e| tracing::warn!("🔒 Rejected {}: {}", target, e))?;

    tracing::debug!("Authenticated user {} for {}", claims.uid(), target);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
