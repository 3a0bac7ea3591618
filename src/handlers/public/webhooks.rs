// handlers/public/webhooks.rs - POST /api/webhooks/stripe handler

use axum::{body::Bytes, http::HeaderMap};

use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::billing_service::WebhookOutcome;
use crate::services::BillingService;

/// The raw body is needed for signature verification, so it is not parsed
/// as `Json`.
pub async fn stripe(headers: HeaderMap, body: Bytes) -> ApiResult<WebhookOutcome> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Stripe-Signature header"))?;

    let service = BillingService::new(DatabaseManager::pool()?);
    let outcome = service.handle_webhook(&body, signature).await?;
    Ok(ApiResponse::success(outcome))
}
