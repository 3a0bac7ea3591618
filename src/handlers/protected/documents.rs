// handlers/protected/documents.rs - /api/estimates, /api/invoices, /api/purchase-orders
//
// One set of handlers serves all three document kinds; the router nests each
// kind under its own prefix with an `Extension<DocumentKind>` layer.

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::Document;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::export::Attachment;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::document_service::{DocumentDetail, DocumentInput, DocumentQuery, PaymentInput};
use crate::services::DocumentService;
use crate::types::Listing;
use crate::workflow::{Action, BulkOutcome, DocumentKind};

#[derive(Debug, Default, Deserialize)]
pub struct TransitionBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveBody {
    pub ids: Vec<Uuid>,
}

fn service(kind: DocumentKind) -> Result<DocumentService, ApiError> {
    Ok(DocumentService::new(DatabaseManager::pool()?, kind))
}

/// Path segment of a transition endpoint → workflow action. Payments have
/// their own endpoint.
pub fn action_from_path(segment: &str) -> Option<Action> {
    Some(match segment {
        "submit" => Action::Submit,
        "approve" => Action::Approve,
        "reject" => Action::Reject,
        "send" => Action::Send,
        "accept" => Action::Accept,
        "decline" => Action::Decline,
        "mark-received" => Action::MarkReceived,
        "mark-paid" => Action::MarkPaid,
        _ => return None,
    })
}

pub async fn list(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Query(query): Query<DocumentQuery>,
) -> ApiResult<Listing<Document>> {
    Ok(ApiResponse::success(service(kind)?.list(user.organization_id, &query).await?))
}

pub async fn get(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<DocumentDetail> {
    Ok(ApiResponse::success(service(kind)?.detail(user.organization_id, id).await?))
}

pub async fn create(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Json(input): Json<DocumentInput>,
) -> ApiResult<DocumentDetail> {
    let detail = service(kind)?.create(user.organization_id, &user.actor(), input).await?;
    Ok(ApiResponse::created(detail))
}

pub async fn update(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<DocumentInput>,
) -> ApiResult<DocumentDetail> {
    let detail = service(kind)?.update(user.organization_id, &user.actor(), id, input).await?;
    Ok(ApiResponse::success(detail))
}

pub async fn delete(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    service(kind)?.delete(user.organization_id, &user.actor(), id).await?;
    Ok(ApiResponse::no_content())
}

/// POST /:id/:action - submit, approve, reject (with `reason`), send, ...
pub async fn transition(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Path((id, segment)): Path<(Uuid, String)>,
    body: Option<Json<TransitionBody>>,
) -> ApiResult<Document> {
    let action = action_from_path(&segment)
        .ok_or_else(|| ApiError::not_found(format!("Unknown {} action '{}'", kind.label(), segment)))?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let document = service(kind)?
        .transition(user.organization_id, &user.actor(), id, action, body.reason.as_deref())
        .await?;
    Ok(ApiResponse::success(document))
}

/// POST /api/invoices/:id/payments
pub async fn record_payment(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<PaymentInput>,
) -> ApiResult<DocumentDetail> {
    let detail = service(kind)?.record_payment(user.organization_id, &user.actor(), id, input).await?;
    Ok(ApiResponse::created(detail))
}

/// POST /api/purchase-orders/bulk-approve
pub async fn bulk_approve(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Json(body): Json<BulkApproveBody>,
) -> ApiResult<BulkOutcome> {
    let outcome = service(kind)?.bulk_approve(user.organization_id, &user.actor(), &body.ids).await?;
    Ok(ApiResponse::success(outcome))
}

pub async fn pdf(
    Extension(kind): Extension<DocumentKind>,
    Extension(user): Extension<ValidatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Attachment, ApiError> {
    service(kind)?.pdf(user.organization_id, id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_segments() {
        assert_eq!(action_from_path("submit"), Some(Action::Submit));
        assert_eq!(action_from_path("mark-received"), Some(Action::MarkReceived));
        assert_eq!(action_from_path("record_payment"), None);
        assert_eq!(action_from_path("payments"), None);
    }
}
