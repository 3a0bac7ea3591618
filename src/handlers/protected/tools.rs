// handlers/protected/tools.rs - /api/tools and /api/tool-items handlers

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use uuid::Uuid;

use crate::database::models::{Tool, ToolItem, ToolMovement};
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::export::Attachment;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::tool_service::{
    ItemInput, ItemQuery, MoveInput, ScannedItem, StatusInput, StockInput, ToolInput, ToolQuery,
};
use crate::services::ToolService;
use crate::types::Listing;

fn service() -> Result<ToolService, ApiError> {
    Ok(ToolService::new(DatabaseManager::pool()?))
}

pub async fn list(Extension(user): Extension<ValidatedUser>, Query(query): Query<ToolQuery>) -> ApiResult<Listing<Tool>> {
    Ok(ApiResponse::success(service()?.list_tools(user.organization_id, &query).await?))
}

pub async fn create(Extension(user): Extension<ValidatedUser>, Json(input): Json<ToolInput>) -> ApiResult<Tool> {
    Ok(ApiResponse::created(service()?.create_tool(user.organization_id, &user.actor(), input).await?))
}

/// Consumables at or below their minimum stock.
pub async fn low_stock(Extension(user): Extension<ValidatedUser>) -> ApiResult<Vec<Tool>> {
    Ok(ApiResponse::success(service()?.low_stock(user.organization_id).await?))
}

/// POST /api/tools/:id/stock - `{ "delta": -3 }`
pub async fn adjust_stock(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<StockInput>,
) -> ApiResult<Tool> {
    Ok(ApiResponse::success(service()?.adjust_stock(user.organization_id, &user.actor(), id, input).await?))
}

/// POST /api/tools/:id/items - register a serialised unit with a fresh QR code.
pub async fn create_item(
    Extension(user): Extension<ValidatedUser>,
    Path(tool_id): Path<Uuid>,
    Json(input): Json<ItemInput>,
) -> ApiResult<ToolItem> {
    let item = service()?.create_item(user.organization_id, &user.actor(), tool_id, input).await?;
    Ok(ApiResponse::created(item))
}

pub async fn list_items(Extension(user): Extension<ValidatedUser>, Query(query): Query<ItemQuery>) -> ApiResult<Listing<ToolItem>> {
    Ok(ApiResponse::success(service()?.list_items(user.organization_id, &query).await?))
}

/// GET /api/tool-items/scan/:qr
pub async fn scan(Extension(user): Extension<ValidatedUser>, Path(qr): Path<String>) -> ApiResult<ScannedItem> {
    let qr = Uuid::parse_str(qr.trim()).map_err(|_| ApiError::bad_request("QR code is not a tool label"))?;
    Ok(ApiResponse::success(service()?.scan(user.organization_id, qr).await?))
}

pub async fn item_qr(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> Result<Attachment, ApiError> {
    service()?.item_qr(user.organization_id, id).await
}

pub async fn move_item(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<MoveInput>,
) -> ApiResult<ToolItem> {
    Ok(ApiResponse::success(service()?.move_item(user.organization_id, &user.actor(), id, input).await?))
}

pub async fn movements(Extension(user): Extension<ValidatedUser>, Path(id): Path<Uuid>) -> ApiResult<Vec<ToolMovement>> {
    Ok(ApiResponse::success(service()?.movements(user.organization_id, id).await?))
}

pub async fn change_status(
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<StatusInput>,
) -> ApiResult<ToolItem> {
    Ok(ApiResponse::success(service()?.change_status(user.organization_id, &user.actor(), id, input).await?))
}
