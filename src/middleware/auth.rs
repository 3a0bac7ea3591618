use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::auth::{validate_jwt, Claims, TokenError, SESSION_COOKIE, TENANT_AUDIENCE};
use crate::error::ApiError;
use crate::types::Role;

/// Authenticated tenant user context extracted from the session token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
    pub impersonated_by: Option<Uuid>,
    /// The token came from the session cookie, so CSRF checks apply.
    pub via_cookie: bool,
}

impl AuthUser {
    fn from_claims(claims: Claims, via_cookie: bool) -> Self {
        Self {
            user_id: claims.sub,
            organization_id: claims.org,
            role: claims.role,
            impersonated_by: claims.impersonated_by,
            via_cookie,
        }
    }
}

/// Session authentication: cookie first, then `Authorization: Bearer`.
pub async fn session_auth(jar: CookieJar, headers: HeaderMap, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let (token, via_cookie) = match jar.get(SESSION_COOKIE) {
        Some(cookie) if !cookie.value().is_empty() => (cookie.value().to_string(), true),
        _ => (bearer_token(&headers)?, false),
    };

    let claims: Claims = validate_jwt(&token, TENANT_AUDIENCE).map_err(|e| {
        tracing::warn!("Rejected session token: {}", e);
        ApiError::from(e)
    })?;

    request.extensions_mut().insert(AuthUser::from_claims(claims, via_cookie));
    Ok(next.run(request).await)
}

/// Extract the token from an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let value = headers.get(header::AUTHORIZATION).ok_or(TokenError::Missing)?;
    let value = value
        .to_str()
        .map_err(|_| TokenError::Invalid("Invalid Authorization header format".to_string()))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        Some(_) => Err(TokenError::Missing),
        None => Err(TokenError::Invalid(
            "Authorization header must use Bearer token format".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(TokenError::Missing));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert!(matches!(bearer_token(&headers), Err(TokenError::Invalid(_))));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  "));
        assert_eq!(bearer_token(&headers), Err(TokenError::Missing));
    }
}
