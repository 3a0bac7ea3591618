// handlers/protected/leave.rs - /api/leave handlers
//
// Visibility and ownership rules live in LeaveService; every call passes
// the caller as an Actor.

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::LeaveRecord;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::leave_service::{LeaveQuery, LeaveUpdate, NewLeave};
use crate::services::LeaveService;
use crate::types::Listing;

fn service() -> Result<LeaveService, ApiError> {
    Ok(LeaveService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<LeaveQuery>) -> ApiResult<Listing<LeaveRecord>> {
    Ok(ApiResponse::success(service()?.list(user.organization_id, &user.actor(), &query).await?))
}

pub async fn get(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<LeaveRecord> {
    Ok(ApiResponse::success(service()?.fetch(user.organization_id, &user.actor(), id).await?))
}

pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<NewLeave>) -> ApiResult<LeaveRecord> {
    Ok(ApiResponse::created(service()?.create(user.organization_id, &user.actor(), input).await?))
}

pub async fn update(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(update): Json<LeaveUpdate>,
) -> ApiResult<LeaveRecord> {
    Ok(ApiResponse::success(service()?.update(user.organization_id, &user.actor(), id, update).await?))
}

pub async fn delete(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<()> {
    service()?.delete(user.organization_id, &user.actor(), id).await?;
    Ok(ApiResponse::no_content())
}
