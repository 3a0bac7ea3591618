// handlers/public/auth/csrf.rs - GET /auth/csrf handler

use axum_extra::extract::CookieJar;
use serde_json::{json, Value};

use crate::auth::csrf;
use crate::error::ApiError;
use crate::handlers::cookies;
use crate::middleware::ApiResponse;

/// Issue a CSRF token: set as cookie and echoed in the body.
pub async fn get(jar: CookieJar) -> Result<(CookieJar, ApiResponse<Value>), ApiError> {
    let token = csrf::generate_token()?;
    let jar = jar.add(cookies::csrf(token.clone()));
    Ok((jar, ApiResponse::success(json!({ "token": token }))))
}
