// handlers/public/auth/login.rs - POST /auth/login handler

use axum::Json;
use axum_extra::extract::CookieJar;

use crate::auth::{csrf, SESSION_COOKIE};
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::handlers::cookies;
use crate::middleware::{ApiResponse, ClientInfo};
use crate::services::user_service::{LoginRequest, Session};
use crate::services::UserService;

/// POST /auth/login - email + password.
///
/// Sets the HTTP-only session cookie and a fresh CSRF cookie. The token is
/// also returned in the body for clients that prefer `Authorization: Bearer`.
pub async fn post(
    jar: CookieJar,
    client: ClientInfo,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<Session>), ApiError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    let service = UserService::new(DatabaseManager::pool()?);
    let session = service.login(&request, &client.ip).await?;

    let jar = jar
        .add(cookies::session(SESSION_COOKIE, session.token.clone()))
        .add(cookies::csrf(csrf::generate_token()?));
    Ok((jar, ApiResponse::success(session)))
}
