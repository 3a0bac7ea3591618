//! Approval state machines for estimates, invoices and purchase orders.
//!
//! Handlers never write a status directly. They ask [`plan`] for a
//! [`Transition`] and then run a single guarded update
//! (`... WHERE status = ANY(from)`), so a lost race surfaces as a conflict
//! instead of a silent overwrite.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Estimate,
    Invoice,
    PurchaseOrder,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Estimate => "estimate",
            DocumentKind::Invoice => "invoice",
            DocumentKind::PurchaseOrder => "purchase_order",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            DocumentKind::Estimate => "estimates",
            DocumentKind::Invoice => "invoices",
            DocumentKind::PurchaseOrder => "purchase_orders",
        }
    }

    pub fn items_table(&self) -> &'static str {
        match self {
            DocumentKind::Estimate => "estimate_items",
            DocumentKind::Invoice => "invoice_items",
            DocumentKind::PurchaseOrder => "purchase_order_items",
        }
    }

    /// Foreign key column on the items table.
    pub fn items_fk(&self) -> &'static str {
        match self {
            DocumentKind::Estimate => "estimate_id",
            DocumentKind::Invoice => "invoice_id",
            DocumentKind::PurchaseOrder => "purchase_order_id",
        }
    }

    pub fn number_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Estimate => "EST",
            DocumentKind::Invoice => "INV",
            DocumentKind::PurchaseOrder => "PO",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Estimate => "Estimate",
            DocumentKind::Invoice => "Invoice",
            DocumentKind::PurchaseOrder => "Purchase order",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified status set. `Rejected` is the internal approval rejection and
/// keeps the document editable; `Declined` is a customer turning down a
/// sent estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Sent,
    Accepted,
    Declined,
    Ordered,
    Received,
    Paid,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Sent => "sent",
            DocumentStatus::Accepted => "accepted",
            DocumentStatus::Declined => "declined",
            DocumentStatus::Ordered => "ordered",
            DocumentStatus::Received => "received",
            DocumentStatus::Paid => "paid",
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, DocumentStatus::Draft | DocumentStatus::Rejected)
    }

    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Draft | DocumentStatus::Submitted | DocumentStatus::Rejected
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "draft" => DocumentStatus::Draft,
            "submitted" => DocumentStatus::Submitted,
            "approved" => DocumentStatus::Approved,
            "rejected" => DocumentStatus::Rejected,
            "sent" => DocumentStatus::Sent,
            "accepted" => DocumentStatus::Accepted,
            "declined" => DocumentStatus::Declined,
            "ordered" => DocumentStatus::Ordered,
            "received" => DocumentStatus::Received,
            "paid" => DocumentStatus::Paid,
            other => return Err(format!("unknown document status: {}", other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    Approve,
    Reject,
    Send,
    Accept,
    Decline,
    RecordPayment,
    MarkReceived,
    MarkPaid,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Send => "send",
            Action::Accept => "accept",
            Action::Decline => "decline",
            Action::RecordPayment => "record_payment",
            Action::MarkReceived => "mark_received",
            Action::MarkPaid => "mark_paid",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("{0}")]
    Forbidden(String),

    #[error("Cannot {action} a {kind} in status '{from}'")]
    InvalidTransition {
        kind: DocumentKind,
        from: DocumentStatus,
        action: Action,
    },

    #[error("{kind} does not support '{action}'")]
    Unsupported { kind: DocumentKind, action: Action },

    #[error("Documents in status '{0}' cannot be edited")]
    NotEditable(DocumentStatus),

    #[error("Documents in status '{0}' cannot be deleted")]
    NotDeletable(DocumentStatus),

    #[error("A rejection reason is required")]
    ReasonRequired,

    #[error("{0}")]
    InvalidAmount(String),

    #[error("Between 1 and {max} ids are required")]
    BatchSize { max: usize },
}

/// Who is acting.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

/// The parts of a document the rules look at.
#[derive(Debug, Clone, Copy)]
pub struct DocumentFacts {
    pub status: DocumentStatus,
    pub created_by: Uuid,
    pub total: Decimal,
}

/// Result of planning an action: the statuses the guarded update may
/// match and the status it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Vec<DocumentStatus>,
    pub to: DocumentStatus,
    /// A purchase order submitted by someone allowed to approve it skips review.
    pub auto_approved: bool,
}

impl Transition {
    fn new(from: &[DocumentStatus], to: DocumentStatus) -> Self {
        Self {
            from: from.to_vec(),
            to,
            auto_approved: false,
        }
    }

    /// `from` as stored strings, for binding to `status = ANY($n)`.
    pub fn from_strs(&self) -> Vec<String> {
        self.from.iter().map(|s| s.as_str().to_string()).collect()
    }
}

/// Minimum role that may approve a document of this kind and total.
pub fn approval_floor(kind: DocumentKind, total: Decimal) -> Role {
    let threshold = Decimal::from(config::config().workflow.admin_approval_threshold);
    if kind == DocumentKind::PurchaseOrder && total >= threshold {
        Role::Admin
    } else {
        Role::Manager
    }
}

/// Roles that receive an approval request notification.
pub fn approver_roles(kind: DocumentKind, total: Decimal) -> Vec<&'static str> {
    Role::at_or_above(approval_floor(kind, total))
}

fn require(actor: &Actor, min: Role, what: &str) -> Result<(), WorkflowError> {
    if actor.role.at_least(min) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(format!(
            "Only {} or above can {}",
            min, what
        )))
    }
}

/// Validate an action against a document and return the guarded transition.
pub fn plan(
    kind: DocumentKind,
    action: Action,
    actor: &Actor,
    doc: &DocumentFacts,
) -> Result<Transition, WorkflowError> {
    use DocumentKind::*;
    use DocumentStatus::*;

    let unsupported = || WorkflowError::Unsupported { kind, action };

    let transition = match action {
        Action::Submit => {
            if actor.user_id != doc.created_by && !actor.role.at_least(Role::Manager) {
                return Err(WorkflowError::Forbidden(
                    "Only the creator or a manager can submit this document".to_string(),
                ));
            }
            let floor = approval_floor(kind, doc.total);
            if kind == PurchaseOrder && actor.role.at_least(floor) {
                Transition {
                    auto_approved: true,
                    ..Transition::new(&[Draft, Rejected], Approved)
                }
            } else {
                Transition::new(&[Draft, Rejected], Submitted)
            }
        }
        Action::Approve => {
            let floor = approval_floor(kind, doc.total);
            require(actor, floor, "approve this document")?;
            Transition::new(&[Submitted], Approved)
        }
        Action::Reject => {
            require(actor, Role::Manager, "reject this document")?;
            Transition::new(&[Submitted], Rejected)
        }
        Action::Send => {
            require(actor, Role::Leader, "send documents")?;
            match kind {
                Estimate | Invoice => Transition::new(&[Approved], Sent),
                PurchaseOrder => Transition::new(&[Approved], Ordered),
            }
        }
        Action::Accept | Action::Decline => {
            if kind != Estimate {
                return Err(unsupported());
            }
            require(actor, Role::Leader, "record a customer response")?;
            let to = if action == Action::Accept { Accepted } else { Declined };
            Transition::new(&[Sent], to)
        }
        Action::RecordPayment => {
            if kind != Invoice {
                return Err(unsupported());
            }
            require(actor, Role::Manager, "record payments")?;
            // Final status depends on the cumulative amount; see `settle_payment`.
            Transition::new(&[Sent], Paid)
        }
        Action::MarkReceived => {
            if kind != PurchaseOrder {
                return Err(unsupported());
            }
            require(actor, Role::Leader, "mark orders as received")?;
            Transition::new(&[Ordered], Received)
        }
        Action::MarkPaid => {
            if kind != PurchaseOrder {
                return Err(unsupported());
            }
            require(actor, Role::Manager, "mark orders as paid")?;
            Transition::new(&[Received], Paid)
        }
    };

    if !transition.from.contains(&doc.status) {
        return Err(WorkflowError::InvalidTransition {
            kind,
            from: doc.status,
            action,
        });
    }

    Ok(transition)
}

pub fn ensure_editable(status: DocumentStatus) -> Result<(), WorkflowError> {
    if status.is_editable() {
        Ok(())
    } else {
        Err(WorkflowError::NotEditable(status))
    }
}

pub fn ensure_deletable(status: DocumentStatus) -> Result<(), WorkflowError> {
    if status.is_deletable() {
        Ok(())
    } else {
        Err(WorkflowError::NotDeletable(status))
    }
}

/// Trimmed, non-empty rejection reason.
pub fn require_reason(reason: Option<&str>) -> Result<String, WorkflowError> {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => Ok(r.to_string()),
        _ => Err(WorkflowError::ReasonRequired),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentOutcome {
    pub paid_amount: Decimal,
    pub status: DocumentStatus,
}

/// Apply a payment to an invoice. Overpayment is accepted and settles it.
pub fn settle_payment(
    total: Decimal,
    already_paid: Decimal,
    amount: Decimal,
) -> Result<PaymentOutcome, WorkflowError> {
    if amount <= Decimal::ZERO {
        return Err(WorkflowError::InvalidAmount(
            "Payment amount must be greater than zero".to_string(),
        ));
    }
    let paid_amount = already_paid + amount;
    let status = if paid_amount >= total {
        DocumentStatus::Paid
    } else {
        DocumentStatus::Sent
    };
    Ok(PaymentOutcome { paid_amount, status })
}

/// Deduplicate and bound the id list of a bulk request, preserving order.
pub fn bulk_ids(ids: &[Uuid]) -> Result<Vec<Uuid>, WorkflowError> {
    let max = config::config().workflow.bulk_approve_max;
    if ids.is_empty() || ids.len() > max {
        return Err(WorkflowError::BatchSize { max });
    }
    let mut seen = std::collections::HashSet::new();
    Ok(ids.iter().copied().filter(|id| seen.insert(*id)).collect())
}

#[derive(Debug, Default, Serialize)]
pub struct BulkOutcome {
    pub approved_ids: Vec<Uuid>,
    pub skipped: Vec<BulkSkip>,
    pub failed_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BulkSkip {
    pub id: Uuid,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yen(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn actor(role: Role) -> Actor {
        Actor { user_id: Uuid::new_v4(), role }
    }

    fn doc(status: DocumentStatus, created_by: Uuid, total: Decimal) -> DocumentFacts {
        DocumentFacts { status, created_by, total }
    }

    #[test]
    fn creator_submits_draft() {
        let staff = actor(Role::Staff);
        let t = plan(
            DocumentKind::Estimate,
            Action::Submit,
            &staff,
            &doc(DocumentStatus::Draft, staff.user_id, yen(1000)),
        )
        .unwrap();
        assert_eq!(t.to, DocumentStatus::Submitted);
        assert_eq!(t.from, vec![DocumentStatus::Draft, DocumentStatus::Rejected]);
        assert!(!t.auto_approved);
    }

    #[test]
    fn other_staff_cannot_submit() {
        let err = plan(
            DocumentKind::Invoice,
            Action::Submit,
            &actor(Role::Leader),
            &doc(DocumentStatus::Draft, Uuid::new_v4(), yen(1000)),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn manager_purchase_order_submit_auto_approves() {
        let manager = actor(Role::Manager);
        let t = plan(
            DocumentKind::PurchaseOrder,
            Action::Submit,
            &manager,
            &doc(DocumentStatus::Draft, manager.user_id, yen(50_000)),
        )
        .unwrap();
        assert_eq!(t.to, DocumentStatus::Approved);
        assert!(t.auto_approved);
    }

    #[test]
    fn manager_large_purchase_order_submit_waits_for_admin() {
        let manager = actor(Role::Manager);
        let t = plan(
            DocumentKind::PurchaseOrder,
            Action::Submit,
            &manager,
            &doc(DocumentStatus::Draft, manager.user_id, yen(1_000_000)),
        )
        .unwrap();
        assert_eq!(t.to, DocumentStatus::Submitted);
        assert!(!t.auto_approved);
    }

    #[test]
    fn non_manager_cannot_approve_invoice() {
        let err = plan(
            DocumentKind::Invoice,
            Action::Approve,
            &actor(Role::Leader),
            &doc(DocumentStatus::Submitted, Uuid::new_v4(), yen(10)),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn large_purchase_order_requires_admin() {
        let facts = doc(DocumentStatus::Submitted, Uuid::new_v4(), yen(1_500_000));
        assert!(plan(DocumentKind::PurchaseOrder, Action::Approve, &actor(Role::Manager), &facts).is_err());
        let t = plan(DocumentKind::PurchaseOrder, Action::Approve, &actor(Role::Admin), &facts).unwrap();
        assert_eq!(t.to, DocumentStatus::Approved);
        assert_eq!(approver_roles(DocumentKind::PurchaseOrder, yen(1_500_000)), vec!["admin"]);
        assert_eq!(approver_roles(DocumentKind::Estimate, yen(1_500_000)), vec!["manager", "admin"]);
    }

    #[test]
    fn manager_can_reject_large_purchase_order() {
        let facts = doc(DocumentStatus::Submitted, Uuid::new_v4(), yen(1_500_000));
        let t = plan(DocumentKind::PurchaseOrder, Action::Reject, &actor(Role::Manager), &facts).unwrap();
        assert_eq!(t.to, DocumentStatus::Rejected);
        assert!(plan(DocumentKind::PurchaseOrder, Action::Reject, &actor(Role::Leader), &facts).is_err());
    }

    #[test]
    fn wrong_status_is_rejected() {
        let err = plan(
            DocumentKind::Estimate,
            Action::Approve,
            &actor(Role::Admin),
            &doc(DocumentStatus::Draft, Uuid::new_v4(), yen(10)),
        )
        .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidTransition {
                kind: DocumentKind::Estimate,
                from: DocumentStatus::Draft,
                action: Action::Approve,
            }
        );
    }

    #[test]
    fn purchase_order_send_means_ordered() {
        let t = plan(
            DocumentKind::PurchaseOrder,
            Action::Send,
            &actor(Role::Leader),
            &doc(DocumentStatus::Approved, Uuid::new_v4(), yen(10)),
        )
        .unwrap();
        assert_eq!(t.to, DocumentStatus::Ordered);
    }

    #[test]
    fn customer_response_only_for_estimates() {
        let facts = doc(DocumentStatus::Sent, Uuid::new_v4(), yen(10));
        let t = plan(DocumentKind::Estimate, Action::Decline, &actor(Role::Leader), &facts).unwrap();
        assert_eq!(t.to, DocumentStatus::Declined);
        let err = plan(DocumentKind::Invoice, Action::Accept, &actor(Role::Admin), &facts).unwrap_err();
        assert!(matches!(err, WorkflowError::Unsupported { .. }));
    }

    #[test]
    fn purchase_order_receipt_and_payment() {
        let received = plan(
            DocumentKind::PurchaseOrder,
            Action::MarkReceived,
            &actor(Role::Leader),
            &doc(DocumentStatus::Ordered, Uuid::new_v4(), yen(10)),
        )
        .unwrap();
        assert_eq!(received.to, DocumentStatus::Received);

        let err = plan(
            DocumentKind::PurchaseOrder,
            Action::MarkPaid,
            &actor(Role::Leader),
            &doc(DocumentStatus::Received, Uuid::new_v4(), yen(10)),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn payment_settles_when_total_reached() {
        let partial = settle_payment(yen(1000), yen(0), yen(400)).unwrap();
        assert_eq!(partial.status, DocumentStatus::Sent);
        assert_eq!(partial.paid_amount, yen(400));

        let full = settle_payment(yen(1000), yen(400), yen(600)).unwrap();
        assert_eq!(full.status, DocumentStatus::Paid);

        assert!(settle_payment(yen(1000), yen(0), yen(0)).is_err());
    }

    #[test]
    fn editable_and_deletable_states() {
        assert!(ensure_editable(DocumentStatus::Rejected).is_ok());
        assert!(ensure_editable(DocumentStatus::Submitted).is_err());
        assert!(ensure_deletable(DocumentStatus::Submitted).is_ok());
        assert_eq!(
            ensure_deletable(DocumentStatus::Approved),
            Err(WorkflowError::NotDeletable(DocumentStatus::Approved))
        );
    }

    #[test]
    fn reason_must_not_be_blank() {
        assert_eq!(require_reason(Some("   ")), Err(WorkflowError::ReasonRequired));
        assert_eq!(require_reason(Some(" price too high ")).unwrap(), "price too high");
    }

    #[test]
    fn bulk_ids_are_bounded_and_deduplicated() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(bulk_ids(&[a, b, a]).unwrap(), vec![a, b]);
        assert!(bulk_ids(&[]).is_err());
        let too_many: Vec<Uuid> = (0..101).map(|_| Uuid::new_v4()).collect();
        assert_eq!(bulk_ids(&too_many), Err(WorkflowError::BatchSize { max: 100 }));
    }
}
