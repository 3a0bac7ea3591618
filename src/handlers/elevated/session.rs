// handlers/elevated/session.rs - admin me, logout and two-factor enrolment

use axum::{Extension, Json};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{csrf::CSRF_COOKIE, ADMIN_COOKIE};
use crate::database::models::SuperAdmin;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::handlers::cookies;
use crate::middleware::{AdminUser, ApiResponse, ApiResult, ClientInfo};
use crate::services::admin_service::TwoFactorSetup;
use crate::services::AdminService;

#[derive(Debug, Deserialize)]
pub struct EnableTwoFactor {
    pub code: String,
}

/// GET /api/admin/me
pub async fn me(Extension(admin): Extension<AdminUser>) -> ApiResult<SuperAdmin> {
    let service = AdminService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.fetch(admin.id).await?))
}

/// POST /api/admin/logout
pub async fn logout(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<Value>), ApiError> {
    let service = AdminService::new(DatabaseManager::pool()?);
    service.log(Some(admin.id), "logout", json!({}), client.as_log()).await;
    let jar = jar
        .remove(cookies::removal(ADMIN_COOKIE))
        .remove(cookies::removal(CSRF_COOKIE));
    Ok((jar, ApiResponse::success(json!({ "logged_out": true }))))
}

/// POST /api/admin/2fa/setup - new secret, not active until confirmed.
pub async fn setup_two_factor(Extension(admin): Extension<AdminUser>) -> ApiResult<TwoFactorSetup> {
    let service = AdminService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.setup_two_factor(admin.id).await?))
}

/// POST /api/admin/2fa/enable - confirm with a current code; the backup
/// codes are shown exactly once.
pub async fn enable_two_factor(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Json(body): Json<EnableTwoFactor>,
) -> ApiResult<Value> {
    let service = AdminService::new(DatabaseManager::pool()?);
    let backup_codes = service.enable_two_factor(admin.id, &body.code, client.as_log()).await?;
    Ok(ApiResponse::success(json!({ "enabled": true, "backup_codes": backup_codes })))
}
