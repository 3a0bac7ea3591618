// handlers/protected/sites.rs - /api/sites handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::Site;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::export::Attachment;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::site_service::SiteInput;
use crate::services::{AttendanceService, SiteService};
use crate::types::Role;

#[derive(Debug, Default, Deserialize)]
pub struct SiteListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<SiteListQuery>) -> ApiResult<Vec<Site>> {
    let service = SiteService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.list(user.organization_id, query.include_inactive).await?))
}

pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<SiteInput>) -> ApiResult<Site> {
    user.require(Role::Manager)?;
    let service = SiteService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::created(service.create(user.organization_id, input).await?))
}

pub async fn update(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<SiteInput>,
) -> ApiResult<Site> {
    user.require(Role::Manager)?;
    let service = SiteService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.update(user.organization_id, id, input).await?))
}

/// GET /api/sites/:id/qr - attendance poster for a site.
pub async fn qr(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> Result<Attachment, ApiError> {
    user.require(Role::Manager)?;
    let service = AttendanceService::new(DatabaseManager::pool()?);
    service.site_qr(user.organization_id, id).await
}
