// handlers/protected/audit.rs - GET /api/audit-logs handler

use axum::{extract::Query, Extension};

use crate::database::models::AuditLog;
use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::audit_service::AuditQuery;
use crate::services::AuditService;
use crate::types::{Listing, Role};

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<AuditQuery>) -> ApiResult<Listing<AuditLog>> {
    user.require(Role::Admin)?;
    let service = AuditService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.list(user.organization_id, &query).await?))
}
