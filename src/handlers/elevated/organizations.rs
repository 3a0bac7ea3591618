// handlers/elevated/organizations.rs - /api/admin/organizations handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::Organization;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{AdminUser, ApiResponse, ApiResult, ClientInfo};
use crate::services::impersonation_service::IssuedToken;
use crate::services::organization_service::{
    CreatedOrganization, NewOrganization, OrganizationQuery, OrganizationSummary,
};
use crate::services::{ImpersonationService, OrganizationService};
use crate::types::Listing;

#[derive(Debug, Deserialize)]
pub struct ImpersonateBody {
    pub user_id: Uuid,
}

fn service() -> Result<OrganizationService, ApiError> {
    Ok(OrganizationService::new(DatabaseManager::pool()?))
}

pub async fn list(
    Extension(admin): Extension<AdminUser>,
    Query(query): Query<OrganizationQuery>,
) -> ApiResult<Listing<OrganizationSummary>> {
    admin.require_owner()?;
    Ok(ApiResponse::success(service()?.list(&query).await?))
}

pub async fn get(Extension(admin): Extension<AdminUser>, Path(id): Path<Uuid>) -> ApiResult<OrganizationSummary> {
    admin.require_owner()?;
    Ok(ApiResponse::success(service()?.fetch(id).await?))
}

/// POST /api/admin/organizations - the organization and its first admin user.
pub async fn create(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Json(input): Json<NewOrganization>,
) -> ApiResult<CreatedOrganization> {
    admin.require_owner()?;
    Ok(ApiResponse::created(service()?.create(admin.id, input, client.as_log()).await?))
}

pub async fn activate(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> ApiResult<Organization> {
    admin.require_owner()?;
    Ok(ApiResponse::success(service()?.set_active(admin.id, id, true, client.as_log()).await?))
}

pub async fn deactivate(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> ApiResult<Organization> {
    admin.require_owner()?;
    Ok(ApiResponse::success(service()?.set_active(admin.id, id, false, client.as_log()).await?))
}

/// POST /api/admin/organizations/:id/impersonate - single-use login link.
pub async fn impersonate(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(body): Json<ImpersonateBody>,
) -> ApiResult<IssuedToken> {
    admin.require_owner()?;
    let service = ImpersonationService::new(DatabaseManager::pool()?);
    let issued = service.issue(admin.id, id, body.user_id, client.as_log()).await?;
    Ok(ApiResponse::created(issued))
}
