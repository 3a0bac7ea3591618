// handlers/protected/clients.rs - /api/clients handlers

use axum::{
    body::Bytes,
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::Client;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::export::Attachment;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::client_service::{ClientInput, ClientQuery, ImportReport};
use crate::services::ClientService;
use crate::types::{Listing, Role};

fn service() -> Result<ClientService, ApiError> {
    Ok(ClientService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<ClientQuery>) -> ApiResult<Listing<Client>> {
    Ok(ApiResponse::success(service()?.list(user.organization_id, &query).await?))
}

pub async fn get(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<Client> {
    Ok(ApiResponse::success(service()?.fetch(user.organization_id, id).await?))
}

pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<ClientInput>) -> ApiResult<Client> {
    user.require(Role::Leader)?;
    Ok(ApiResponse::created(service()?.create(user.organization_id, user.id, input).await?))
}

pub async fn update(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<ClientInput>,
) -> ApiResult<Client> {
    user.require(Role::Leader)?;
    Ok(ApiResponse::success(service()?.update(user.organization_id, user.id, id, input).await?))
}

pub async fn delete(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<()> {
    user.require(Role::Manager)?;
    service()?.delete(user.organization_id, user.id, id).await?;
    Ok(ApiResponse::no_content())
}

/// GET /api/clients/export - CSV download, admin only.
pub async fn export(Extension(user): Extension<ValidatedUser>) -> Result<Attachment, ApiError> {
    user.require(Role::Admin)?;
    service()?.export_csv(user.organization_id).await
}

/// POST /api/clients/import - raw CSV body (same columns as the export).
/// Only available inside an impersonation session opened from the admin
/// console. Rows are validated and inserted one by one; the report lists failures.
pub async fn import(Extension(user): Extension<ValidatedUser>, body: Bytes) -> ApiResult<ImportReport> {
    user.require_impersonation()?;
    if body.is_empty() {
        return Err(ApiError::bad_request("CSV body is empty"));
    }
    Ok(ApiResponse::success(service()?.import_csv(user.organization_id, user.id, &body).await?))
}
