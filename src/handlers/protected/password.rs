// handlers/protected/password.rs - signed-in password change
//
// Two steps: the current password gets a code mailed, the code plus the
// new password completes the change.

use axum::{Extension, Json};

use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::password_service::{ConfirmChange, RequestChange};
use crate::services::PasswordService;

/// POST /api/users/password/request-change
pub async fn request_change(Extension(user): Extension<ValidatedUser>, Json(request): Json<RequestChange>) -> ApiResult<()> {
    PasswordService::new(DatabaseManager::pool()?)
        .request_change(user.id, &request)
        .await?;
    Ok(ApiResponse::no_content())
}

/// POST /api/users/password/verify-and-change
pub async fn confirm_change(Extension(user): Extension<ValidatedUser>, Json(request): Json<ConfirmChange>) -> ApiResult<()> {
    PasswordService::new(DatabaseManager::pool()?)
        .confirm_change(user.id, &request)
        .await?;
    Ok(ApiResponse::no_content())
}
