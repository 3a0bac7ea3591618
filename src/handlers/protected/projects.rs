// handlers/protected/projects.rs - /api/projects handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::Project;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::project_service::{ProjectInput, ProjectQuery};
use crate::services::ProjectService;
use crate::types::{Listing, Role};

fn service() -> Result<ProjectService, ApiError> {
    Ok(ProjectService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<ProjectQuery>) -> ApiResult<Listing<Project>> {
    Ok(ApiResponse::success(service()?.list(user.organization_id, &query).await?))
}

pub async fn get(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<Project> {
    Ok(ApiResponse::success(service()?.fetch(user.organization_id, id).await?))
}

pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<ProjectInput>) -> ApiResult<Project> {
    user.require(Role::Leader)?;
    Ok(ApiResponse::created(service()?.create(user.organization_id, user.id, input).await?))
}

pub async fn update(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<ProjectInput>,
) -> ApiResult<Project> {
    user.require(Role::Leader)?;
    Ok(ApiResponse::success(service()?.update(user.organization_id, user.id, id, input).await?))
}

pub async fn delete(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<()> {
    user.require(Role::Manager)?;
    service()?.delete(user.organization_id, user.id, id).await?;
    Ok(ApiResponse::no_content())
}
