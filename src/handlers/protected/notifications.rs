// handlers/protected/notifications.rs - /api/notifications handlers

use axum::{
    extract::{Path, Query},
    Extension,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::Notification;
use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::notification_service::NotificationQuery;
use crate::services::NotificationService;
use crate::types::Listing;

pub async fn list(
    Extension(user): Extension<ValidatedUser>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Listing<Notification>> {
    let service = NotificationService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.list_for_user(user.id, &query).await?))
}

pub async fn mark_read(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<Notification> {
    let service = NotificationService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.mark_read(user.id, id).await?))
}

pub async fn mark_all_read(Extension(user): Extension<ValidatedUser>) -> ApiResult<Value> {
    let service = NotificationService::new(DatabaseManager::pool()?);
    let updated = service.mark_all_read(user.id).await?;
    Ok(ApiResponse::success(json!({ "updated": updated })))
}
