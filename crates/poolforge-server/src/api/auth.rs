//! Bearer-token guard for signer administration
//!
//! Admin routes answer 401 unless the request carries
//! `Authorization: Bearer <token>` matching the configured admin token.
//! Without a configured token every admin request is refused.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// Reject the request unless it presents the admin token
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!(path = %request.uri().path(), "Admin request refused, no admin token configured");
        return Err(ApiError::Unauthorized("Administration is disabled".into()));
    };

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| tokens_match(token, expected));

    if !authorized {
        warn!(path = %request.uri().path(), "Admin request with missing or wrong token");
        return Err(ApiError::Unauthorized("Admin token required".into()));
    }
    Ok(next.run(request).await)
}

/// Compare digests so the comparison time does not depend on the secret
fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
