// handlers/public/auth/logout.rs - POST /auth/logout handler

use axum_extra::extract::CookieJar;
use serde_json::{json, Value};

use crate::auth::{csrf::CSRF_COOKIE, SESSION_COOKIE};
use crate::handlers::cookies;
use crate::middleware::ApiResponse;

/// Sessions are stateless JWTs; logging out drops the cookies.
pub async fn post(jar: CookieJar) -> (CookieJar, ApiResponse<Value>) {
    let jar = jar
        .remove(cookies::removal(SESSION_COOKIE))
        .remove(cookies::removal(CSRF_COOKIE));
    (jar, ApiResponse::success(json!({ "logged_out": true })))
}
