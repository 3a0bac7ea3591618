// handlers/elevated/sales.rs - /api/admin/leads handlers (owners and sales)

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::{SalesActivity, SalesLead};
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{AdminUser, ApiResponse, ApiResult, ClientInfo};
use crate::services::sales_service::{LeadQuery, LeadStatusUpdate, NewActivity, NewLead};
use crate::services::SalesService;
use crate::types::Listing;

fn service() -> Result<SalesService, ApiError> {
    Ok(SalesService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(_admin): Extension<AdminUser>, Query(query): Query<LeadQuery>) -> ApiResult<Listing<SalesLead>> {
    Ok(ApiResponse::success(service()?.list_leads(&query).await?))
}

pub async fn create(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Json(input): Json<NewLead>,
) -> ApiResult<SalesLead> {
    Ok(ApiResponse::created(service()?.create_lead(admin.id, input, client.as_log()).await?))
}

pub async fn update_status(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(input): Json<LeadStatusUpdate>,
) -> ApiResult<SalesLead> {
    Ok(ApiResponse::success(service()?.update_status(admin.id, id, input, client.as_log()).await?))
}

pub async fn activities(Extension(_admin): Extension<AdminUser>, Path(id): Path<Uuid>) -> ApiResult<Vec<SalesActivity>> {
    Ok(ApiResponse::success(service()?.activities(id).await?))
}

pub async fn add_activity(
    Extension(admin): Extension<AdminUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<NewActivity>,
) -> ApiResult<SalesActivity> {
    Ok(ApiResponse::created(service()?.add_activity(admin.id, id, input).await?))
}
