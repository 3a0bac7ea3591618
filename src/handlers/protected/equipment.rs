// handlers/protected/equipment.rs - /api/equipment handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::Equipment;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::equipment_service::{EquipmentInput, EquipmentQuery};
use crate::services::EquipmentService;
use crate::types::{Listing, Role};

fn service() -> Result<EquipmentService, ApiError> {
    Ok(EquipmentService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<EquipmentQuery>) -> ApiResult<Listing<Equipment>> {
    Ok(ApiResponse::success(service()?.list(user.organization_id, &query).await?))
}

pub async fn get(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<Equipment> {
    Ok(ApiResponse::success(service()?.fetch(user.organization_id, id).await?))
}

pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<EquipmentInput>) -> ApiResult<Equipment> {
    user.require(Role::Manager)?;
    Ok(ApiResponse::created(service()?.create(user.organization_id, user.id, input).await?))
}

pub async fn update(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<EquipmentInput>,
) -> ApiResult<Equipment> {
    user.require(Role::Manager)?;
    Ok(ApiResponse::success(service()?.update(user.organization_id, user.id, id, input).await?))
}

pub async fn delete(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<()> {
    user.require(Role::Manager)?;
    service()?.delete(user.organization_id, user.id, id).await?;
    Ok(ApiResponse::no_content())
}
