// handlers/public/auth/password.rs - forgotten password handlers

use axum::Json;
use serde_json::{json, Value};

use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult, ClientInfo};
use crate::services::password_service::{ForgotPassword, ResetPassword};
use crate::services::PasswordService;

/// POST /auth/forgot-password - same answer whether or not the address exists.
pub async fn forgot(client: ClientInfo, Json(request): Json<ForgotPassword>) -> ApiResult<Value> {
    PasswordService::new(DatabaseManager::pool()?)
        .forgot(&request, &client.ip)
        .await?;
    Ok(ApiResponse::success(json!({
        "message": "If the address is registered, a reset link has been sent"
    })))
}

/// POST /auth/reset-password - redeem the emailed token.
pub async fn reset(Json(request): Json<ResetPassword>) -> ApiResult<Value> {
    PasswordService::new(DatabaseManager::pool()?)
        .reset(&request)
        .await?;
    Ok(ApiResponse::success(json!({ "reset": true })))
}
