// handlers/public/admin/login.rs - POST /api/admin/login and /api/admin/login/verify-2fa

use axum::Json;
use axum_extra::extract::CookieJar;

use crate::auth::{csrf, ADMIN_COOKIE};
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::handlers::cookies;
use crate::middleware::{ApiResponse, ClientInfo};
use crate::services::admin_service::{AdminLogin, AdminLoginRequest, VerifyTwoFactorRequest};
use crate::services::AdminService;

fn with_session(jar: CookieJar, outcome: &AdminLogin) -> Result<CookieJar, ApiError> {
    match outcome {
        AdminLogin::Authenticated { token, .. } => Ok(jar
            .add(cookies::session(ADMIN_COOKIE, token.clone()))
            .add(cookies::csrf(csrf::generate_token()?))),
        AdminLogin::TwoFactorRequired { .. } => Ok(jar),
    }
}

/// POST /api/admin/login - password step. Answers either with a session or
/// with a two-factor challenge token.
pub async fn post(
    jar: CookieJar,
    client: ClientInfo,
    Json(request): Json<AdminLoginRequest>,
) -> Result<(CookieJar, ApiResponse<AdminLogin>), ApiError> {
    let service = AdminService::new(DatabaseManager::pool()?);
    let outcome = service.login(&request, client.as_log()).await?;
    Ok((with_session(jar, &outcome)?, ApiResponse::success(outcome)))
}

/// POST /api/admin/login/verify-2fa - TOTP or backup code against a challenge.
pub async fn verify_two_factor(
    jar: CookieJar,
    client: ClientInfo,
    Json(request): Json<VerifyTwoFactorRequest>,
) -> Result<(CookieJar, ApiResponse<AdminLogin>), ApiError> {
    let service = AdminService::new(DatabaseManager::pool()?);
    let outcome = service.verify_two_factor(&request, client.as_log()).await?;
    Ok((with_session(jar, &outcome)?, ApiResponse::success(outcome)))
}
