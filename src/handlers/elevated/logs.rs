// handlers/elevated/logs.rs - GET /api/admin/logs handler

use axum::{extract::Query, Extension};

use crate::database::models::SuperAdminLog;
use crate::database::DatabaseManager;
use crate::middleware::{AdminUser, ApiResponse, ApiResult};
use crate::services::admin_service::LogQuery;
use crate::services::AdminService;
use crate::types::Listing;

pub async fn list(Extension(admin): Extension<AdminUser>, Query(query): Query<LogQuery>) -> ApiResult<Listing<SuperAdminLog>> {
    admin.require_owner()?;
    let service = AdminService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.list_logs(&query).await?))
}
