// handlers/protected/dashboard.rs - /api/dashboard handlers

use axum::Extension;

use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::dashboard_service::{Alert, DashboardStats};
use crate::services::DashboardService;
use crate::types::Role;

/// GET /api/dashboard/stats - panels depend on the caller's role.
pub async fn stats(Extension(user): Extension<ValidatedUser>) -> ApiResult<DashboardStats> {
    let service = DashboardService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.stats(user.organization_id, user.id, user.role).await?))
}

/// GET /api/dashboard/alerts - leaders and above.
pub async fn alerts(Extension(user): Extension<ValidatedUser>) -> ApiResult<Vec<Alert>> {
    user.require(Role::Leader)?;
    let service = DashboardService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.alerts(user.organization_id).await?))
}
