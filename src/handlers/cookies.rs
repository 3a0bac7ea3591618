// handlers/cookies.rs - session and CSRF cookie builders

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::auth::csrf::CSRF_COOKIE;
use crate::config;

/// HTTP-only session cookie scoped to the whole site.
pub fn session(name: &'static str, token: String) -> Cookie<'static> {
    Cookie::build((name, token))
        .path("/")
        .http_only(true)
        .secure(config::config().security.secure_cookies)
        .same_site(SameSite::Lax)
        .into()
}

/// The CSRF cookie is readable by scripts so they can echo it in the header.
pub fn csrf(token: String) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .path("/")
        .http_only(false)
        .secure(config::config().security.secure_cookies)
        .same_site(SameSite::Strict)
        .into()
}

/// Removal cookie; the path must match the one the cookie was set with.
pub fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only() {
        let cookie = session("genba_session", "abc".to_string());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(csrf("t".to_string()).http_only(), Some(false));
    }
}
