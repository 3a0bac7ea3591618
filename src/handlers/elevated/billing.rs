// handlers/elevated/billing.rs - /api/admin/billing-invoices handlers

use axum::{
    extract::{Path, Query},
    Extension,
};
use uuid::Uuid;

use crate::database::models::BillingInvoice;
use crate::database::DatabaseManager;
use crate::middleware::{AdminUser, ApiResponse, ApiResult, ClientInfo};
use crate::services::billing_service::InvoiceQuery;
use crate::services::BillingService;
use crate::types::Listing;

pub async fn list(
    Extension(admin): Extension<AdminUser>,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Listing<BillingInvoice>> {
    admin.require_owner()?;
    let service = BillingService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.list(&query).await?))
}

/// Bank-transfer invoices are settled by hand.
pub async fn mark_paid(
    Extension(admin): Extension<AdminUser>,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> ApiResult<BillingInvoice> {
    admin.require_owner()?;
    let service = BillingService::new(DatabaseManager::pool()?);
    Ok(ApiResponse::success(service.mark_paid(admin.id, id, client.as_log()).await?))
}
