// handlers/protected/suppliers.rs - /api/suppliers handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::Supplier;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::supplier_service::{SupplierInput, SupplierQuery};
use crate::services::SupplierService;
use crate::types::{Listing, Role};

fn service() -> Result<SupplierService, ApiError> {
    Ok(SupplierService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<SupplierQuery>) -> ApiResult<Listing<Supplier>> {
    Ok(ApiResponse::success(service()?.list(user.organization_id, &query).await?))
}

pub async fn get(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<Supplier> {
    Ok(ApiResponse::success(service()?.fetch(user.organization_id, id).await?))
}

pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<SupplierInput>) -> ApiResult<Supplier> {
    user.require(Role::Leader)?;
    Ok(ApiResponse::created(service()?.create(user.organization_id, user.id, input).await?))
}

pub async fn update(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<SupplierInput>,
) -> ApiResult<Supplier> {
    user.require(Role::Leader)?;
    Ok(ApiResponse::success(service()?.update(user.organization_id, user.id, id, input).await?))
}

/// DELETE /api/suppliers/:id - admin only; refused while purchase orders reference it.
pub async fn delete(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<()> {
    user.require(Role::Admin)?;
    service()?.delete(user.organization_id, user.id, id).await?;
    Ok(ApiResponse::no_content())
}
