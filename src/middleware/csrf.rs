use axum::{
    extract::Request,
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::auth::csrf::{self, CSRF_COOKIE, CSRF_HEADER};
use crate::error::ApiError;

use super::auth::AuthUser;

pub fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Double-submit check on mutating requests. Bearer-authenticated requests
/// carry no ambient credentials and are let through.
pub async fn csrf_guard(jar: CookieJar, headers: HeaderMap, request: Request, next: Next) -> Result<Response, ApiError> {
    let bearer_only = request
        .extensions()
        .get::<AuthUser>()
        .map_or(false, |user| !user.via_cookie);

    if is_mutating(request.method()) && !bearer_only {
        let cookie = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
        let header = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
        if let Err(e) = csrf::verify(cookie.as_deref(), header) {
            tracing::warn!("CSRF check failed for {} {}: {}", request.method(), request.uri().path(), e);
            return Err(e.into());
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_writes_are_checked() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
    }
}
