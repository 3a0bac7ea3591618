// handlers/protected/users.rs - /api/users handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::User;
use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::user_service::{NewUser, UserQuery, UserUpdate};
use crate::services::UserService;
use crate::types::{Listing, Role};

/// GET /api/users - everyone can see colleagues (assignment pickers).
pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<UserQuery>) -> ApiResult<Listing<User>> {
    let service = UserService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.list(user.organization_id, &query).await?))
}

/// POST /api/users - admin only; bounded by the organization's seat limit.
pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<NewUser>) -> ApiResult<User> {
    user.require(Role::Admin)?;
    let service = UserService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::created(service.create(user.organization_id, user.id, input).await?))
}

/// PATCH /api/users/:id - admin only.
pub async fn update(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<UserUpdate>,
) -> ApiResult<User> {
    user.require(Role::Admin)?;
    let service = UserService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.update(user.organization_id, user.id, id, input).await?))
}
