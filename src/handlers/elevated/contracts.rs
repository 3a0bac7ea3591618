// handlers/elevated/contracts.rs - /api/admin/contracts handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::Contract;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{AdminUser, ApiResponse, ApiResult, ClientInfo};
use crate::services::contract_service::{CompleteContract, ContractQuery, ContractUpdate, NewContract, PlanChange};
use crate::services::ContractService;
use crate::types::Listing;

fn service() -> Result<ContractService, ApiError> {
    Ok(ContractService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(admin): Extension<AdminUser>, Query(query): Query<ContractQuery>) -> ApiResult<Listing<Contract>> {
    admin.require_owner()?;
    Ok(ApiResponse::success(service()?.list(&query).await?))
}

pub async fn create(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Json(input): Json<NewContract>,
) -> ApiResult<Contract> {
    admin.require_owner()?;
    Ok(ApiResponse::created(service()?.create(admin.id, input, client.as_log()).await?))
}

pub async fn update(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(input): Json<ContractUpdate>,
) -> ApiResult<Contract> {
    admin.require_owner()?;
    Ok(ApiResponse::success(service()?.update(admin.id, id, input, client.as_log()).await?))
}

/// POST /api/admin/contracts/:id/complete - body optional; ends today by default.
pub async fn complete(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    body: Option<Json<CompleteContract>>,
) -> ApiResult<Contract> {
    admin.require_owner()?;
    let input = body.map(|Json(b)| b).unwrap_or(CompleteContract { end_date: None });
    Ok(ApiResponse::success(service()?.complete(admin.id, id, input, client.as_log()).await?))
}

/// POST /api/admin/contracts/:id/plan-change - applied by the cron job on its date.
pub async fn plan_change(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(input): Json<PlanChange>,
) -> ApiResult<Contract> {
    admin.require_owner()?;
    Ok(ApiResponse::success(
        service()?.schedule_plan_change(admin.id, id, input, client.as_log()).await?,
    ))
}
