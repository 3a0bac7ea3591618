use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use subtle::ConstantTimeEq;

use crate::config;
use crate::error::ApiError;

use super::auth::bearer_token;

/// Constant-time comparison of the presented bearer token with the secret.
/// An empty secret never matches.
pub fn cron_secret_matches(presented: &str, secret: &str) -> bool {
    !secret.is_empty() && presented.len() == secret.len() && bool::from(presented.as_bytes().ct_eq(secret.as_bytes()))
}

/// `Authorization: Bearer <CRON_SECRET>` on every `/api/cron/*` call.
pub async fn cron_auth(headers: HeaderMap, request: Request, next: Next) -> Result<Response, ApiError> {
    let presented = bearer_token(&headers).map_err(|_| ApiError::unauthorized("Cron secret required"))?;
    if !cron_secret_matches(&presented, &config::config().security.cron_secret) {
        tracing::warn!("Rejected cron call to {}", request.uri().path());
        return Err(ApiError::unauthorized("Invalid cron secret"));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_comparison() {
        assert!(cron_secret_matches("s3cret", "s3cret"));
        assert!(!cron_secret_matches("s3cre", "s3cret"));
        assert!(!cron_secret_matches("wrong!", "s3cret"));
        assert!(!cron_secret_matches("", ""));
    }
}
