// handlers/protected/me.rs - GET /api/auth/me handler

use axum::Extension;
use serde_json::{json, Value};

use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::UserService;

pub async fn get(Extension(user): Extension<ValidatedUser>) -> ApiResult<Value> {
    let service = UserService::new(DatabaseManager::pool()?);
    let record = service.fetch(user.organization_id, user.id).await?;
    Ok(ApiResponse::success(json!({
        "user": record,
        "impersonated_by": user.impersonated_by,
    })))
}
