//! Estimates, invoices and purchase orders.
//!
//! The three kinds live in separate tables with differently named number
//! and date columns. Every read goes through [`DocumentService::projection`]
//! so callers see one [`Document`] shape.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::database::models::{Document, HistoryEntry, LineItem, Payment};
use crate::error::ApiError;
use crate::export::pdf::{render_document, PrintableDocument};
use crate::export::Attachment;
use crate::types::{business_today, Listing, Page, Role};
use crate::workflow::{
    self, Action, Actor, BulkOutcome, BulkSkip, DocumentFacts, DocumentKind, DocumentStatus, Transition,
};

use super::audit_service::{AuditEntry, AuditService};
use super::notification_service::{NewNotification, NotificationService};

/// Column names that differ between the three document tables.
struct Columns {
    number: &'static str,
    issue_date: &'static str,
    due_date: &'static str,
}

fn columns(kind: DocumentKind) -> Columns {
    match kind {
        DocumentKind::Estimate => Columns {
            number: "estimate_number",
            issue_date: "estimate_date",
            due_date: "valid_until",
        },
        DocumentKind::Invoice => Columns {
            number: "invoice_number",
            issue_date: "invoice_date",
            due_date: "due_date",
        },
        DocumentKind::PurchaseOrder => Columns {
            number: "order_number",
            issue_date: "order_date",
            due_date: "delivery_date",
        },
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemInput {
    pub item_type: Option<String>,
    pub custom_type: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub tax_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    /// Generated as `PREFIX-YYYYMM-NNNN` when omitted.
    pub number: Option<String>,
    pub client_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    /// Source estimate of an invoice.
    pub estimate_id: Option<Uuid>,
    /// Ordering supplier of a purchase order.
    pub supplier_id: Option<Uuid>,
    pub title: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItemInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DocumentQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInput {
    pub amount: Decimal,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub items: Vec<LineItem>,
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payments: Option<Vec<Payment>>,
}

/// A validated line with its server-side amount.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedItem {
    pub item_type: String,
    pub custom_type: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Validate lines and recompute amounts. Tax is computed once per rate
/// over the summed amounts and truncated to whole yen.
pub fn price_items(items: &[LineItemInput]) -> Result<(Vec<PricedItem>, Totals), ApiError> {
    let default_rate = Decimal::from(config::config().billing.tax_rate_percent);
    let hundred = Decimal::from(100);
    let mut priced = Vec::with_capacity(items.len());
    let mut by_rate: BTreeMap<Decimal, Decimal> = BTreeMap::new();

    for (i, item) in items.iter().enumerate() {
        let description = item.description.trim();
        if description.is_empty() {
            return Err(ApiError::field(format!("items[{}].description", i), "Description is required"));
        }
        if item.quantity.is_zero() {
            return Err(ApiError::field(format!("items[{}].quantity", i), "Quantity must not be zero"));
        }
        let tax_rate = item.tax_rate.unwrap_or(default_rate);
        if tax_rate < Decimal::ZERO || tax_rate > hundred {
            return Err(ApiError::field(format!("items[{}].tax_rate", i), "Tax rate must be between 0 and 100"));
        }

        let amount = (item.quantity * item.unit_price).round();
        *by_rate.entry(tax_rate).or_insert(Decimal::ZERO) += amount;

        priced.push(PricedItem {
            item_type: item.item_type.clone().unwrap_or_else(|| "other".to_string()),
            custom_type: item.custom_type.clone(),
            description: description.to_string(),
            quantity: item.quantity,
            unit: item.unit.clone(),
            unit_price: item.unit_price,
            tax_rate,
            amount,
        });
    }

    let subtotal: Decimal = by_rate.values().copied().sum();
    let tax_amount: Decimal = by_rate
        .iter()
        .map(|(rate, amount)| (*amount * *rate / hundred).trunc())
        .sum();

    Ok((
        priced,
        Totals {
            subtotal,
            tax_amount,
            total_amount: subtotal + tax_amount,
        },
    ))
}

/// `EST-202604-0007`
pub fn format_number(kind: DocumentKind, issued: NaiveDate, sequence: i64) -> String {
    format!("{}-{}-{:04}", kind.number_prefix(), issued.format("%Y%m"), sequence)
}

/// A row another tenant could own, named by a document field.
#[derive(Debug, PartialEq)]
struct Reference {
    table: &'static str,
    field: &'static str,
    missing: &'static str,
    id: Uuid,
}

fn references(kind: DocumentKind, input: &DocumentInput) -> Vec<Reference> {
    let mut found = Vec::new();
    if let Some(id) = input.client_id {
        found.push(Reference { table: "clients", field: "client_id", missing: "Client not found", id });
    }
    if let Some(id) = input.project_id {
        found.push(Reference { table: "projects", field: "project_id", missing: "Project not found", id });
    }
    if let (DocumentKind::Invoice, Some(id)) = (kind, input.estimate_id) {
        found.push(Reference { table: "estimates", field: "estimate_id", missing: "Estimate not found", id });
    }
    if let (DocumentKind::PurchaseOrder, Some(id)) = (kind, input.supplier_id) {
        found.push(Reference { table: "suppliers", field: "supplier_id", missing: "Supplier not found", id });
    }
    found
}

/// The one link column only some kinds have, with its value from `input`.
fn kind_link(kind: DocumentKind, input: &DocumentInput) -> Option<(&'static str, Option<Uuid>)> {
    match kind {
        DocumentKind::Invoice => Some(("estimate_id", input.estimate_id)),
        DocumentKind::PurchaseOrder => Some(("supplier_id", input.supplier_id)),
        DocumentKind::Estimate => None,
    }
}

/// Column updates written alongside the new status.
fn transition_sets(action: Action, transition: &Transition) -> &'static str {
    match transition.to {
        DocumentStatus::Submitted => "submitted_at = now(), rejected_reason = NULL",
        DocumentStatus::Approved if action == Action::Submit => {
            "submitted_at = now(), approved_by = $5, approved_at = now(), rejected_reason = NULL"
        }
        DocumentStatus::Approved => "approved_by = $5, approved_at = now()",
        DocumentStatus::Rejected => "rejected_reason = $6",
        DocumentStatus::Sent => "sent_at = now()",
        DocumentStatus::Accepted | DocumentStatus::Declined => "responded_at = now()",
        DocumentStatus::Ordered => "ordered_at = now()",
        DocumentStatus::Received => "received_at = now()",
        DocumentStatus::Paid => "paid_at = now()",
        DocumentStatus::Draft => "rejected_reason = NULL",
    }
}

fn parse_status(raw: &str) -> Result<DocumentStatus, ApiError> {
    raw.parse::<DocumentStatus>()
        .map_err(|_| ApiError::bad_request(format!("Document has unknown status '{}'", raw)))
}

fn facts(doc: &Document) -> Result<DocumentFacts, ApiError> {
    Ok(DocumentFacts {
        status: parse_status(&doc.status)?,
        created_by: doc.created_by,
        total: doc.total_amount,
    })
}

fn ensure_owner_or_manager(actor: &Actor, doc: &Document, what: &str) -> Result<(), ApiError> {
    if actor.user_id == doc.created_by || actor.role.at_least(Role::Manager) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!("Only the creator or a manager can {}", what)))
    }
}

pub struct DocumentService {
    pool: PgPool,
    kind: DocumentKind,
}

impl DocumentService {
    pub fn new(pool: PgPool, kind: DocumentKind) -> Self {
        Self { pool, kind }
    }

    fn projection(&self) -> String {
        let c = columns(self.kind);
        let paid = if self.kind == DocumentKind::Invoice {
            "d.paid_amount"
        } else {
            "0::numeric"
        };
        let supplier = if self.kind == DocumentKind::PurchaseOrder {
            "d.supplier_id"
        } else {
            "NULL::uuid"
        };
        format!(
            r#"
            SELECT d.id, d.organization_id, d.{number} AS number, d.client_id, c.name AS client_name,
                   d.project_id, {supplier} AS supplier_id, d.title, d.{issue} AS issue_date, d.{due} AS due_date, d.status,
                   d.subtotal, d.tax_amount, d.total_amount, {paid} AS paid_amount, d.notes,
                   d.created_by, d.submitted_at, d.approved_by, d.approved_at, d.rejected_reason,
                   d.created_at, d.updated_at
            FROM {table} d
            LEFT JOIN clients c ON c.id = d.client_id AND c.organization_id = d.organization_id
            "#,
            number = c.number,
            issue = c.issue_date,
            due = c.due_date,
            paid = paid,
            supplier = supplier,
            table = self.kind.table(),
        )
    }

    fn not_found(&self) -> ApiError {
        ApiError::not_found(format!("{} not found", self.kind.label()))
    }

    pub async fn list(&self, organization_id: Uuid, query: &DocumentQuery) -> Result<Listing<Document>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let status = query.status.as_deref().map(parse_status).transpose()?;
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));
        let c = columns(self.kind);

        let filter = format!(
            r#"
            WHERE d.organization_id = $1 AND d.deleted_at IS NULL
              AND ($2::text IS NULL OR d.{number} ILIKE $2 OR d.title ILIKE $2)
              AND ($3::text IS NULL OR d.status = $3)
              AND ($4::uuid IS NULL OR d.client_id = $4)
              AND ($5::uuid IS NULL OR d.project_id = $5)
            "#,
            number = c.number
        );

        let items: Vec<Document> = sqlx::query_as(&format!(
            "{} {} ORDER BY d.{} DESC, d.created_at DESC LIMIT $6 OFFSET $7",
            self.projection(),
            filter,
            c.issue_date
        ))
        .bind(organization_id)
        .bind(&search)
        .bind(status.map(|s| s.as_str()))
        .bind(query.client_id)
        .bind(query.project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {} d {}", self.kind.table(), filter))
            .bind(organization_id)
            .bind(&search)
            .bind(status.map(|s| s.as_str()))
            .bind(query.client_id)
            .bind(query.project_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, organization_id: Uuid, id: Uuid) -> Result<Document, ApiError> {
        sqlx::query_as(&format!(
            "{} WHERE d.id = $1 AND d.organization_id = $2 AND d.deleted_at IS NULL",
            self.projection()
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| self.not_found())
    }

    pub async fn items(&self, id: Uuid) -> Result<Vec<LineItem>, ApiError> {
        let items = sqlx::query_as(&format!(
            r#"
            SELECT id, sort_order, item_type, custom_type, description, quantity, unit, unit_price, tax_rate, amount
            FROM {} WHERE {} = $1 ORDER BY sort_order
            "#,
            self.kind.items_table(),
            self.kind.items_fk()
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn history(&self, organization_id: Uuid, id: Uuid) -> Result<Vec<HistoryEntry>, ApiError> {
        let history = sqlx::query_as(
            r#"
            SELECT h.id, h.action, h.from_status, h.to_status, h.performed_by,
                   u.name AS performed_by_name, h.notes, h.created_at
            FROM document_history h
            LEFT JOIN users u ON u.id = h.performed_by
            WHERE h.organization_id = $1 AND h.document_kind = $2 AND h.document_id = $3
            ORDER BY h.created_at
            "#,
        )
        .bind(organization_id)
        .bind(self.kind.as_str())
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(history)
    }

    async fn payments(&self, organization_id: Uuid, id: Uuid) -> Result<Vec<Payment>, ApiError> {
        let payments = sqlx::query_as(
            "SELECT * FROM payments WHERE invoice_id = $1 AND organization_id = $2 ORDER BY payment_date, created_at",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    pub async fn detail(&self, organization_id: Uuid, id: Uuid) -> Result<DocumentDetail, ApiError> {
        let document = self.fetch(organization_id, id).await?;
        let items = self.items(id).await?;
        let history = self.history(organization_id, id).await?;
        let payments = if self.kind == DocumentKind::Invoice {
            Some(self.payments(organization_id, id).await?)
        } else {
            None
        };
        Ok(DocumentDetail {
            document,
            items,
            history,
            payments,
        })
    }

    /// Take the next free sequence for the issue month. The counter row is
    /// locked by the upsert until the transaction ends, and numbers entered
    /// by hand are skipped.
    async fn next_number(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        issued: NaiveDate,
    ) -> Result<String, ApiError> {
        let c = columns(self.kind);
        let period = issued.format("%Y%m").to_string();
        let prefix = format!("{}-{}-", self.kind.number_prefix(), period);
        let counter = format!(
            r#"
            INSERT INTO document_counters (organization_id, document_kind, period, last_value)
            VALUES ($1, $2, $3, (SELECT COUNT(*)::int FROM {table} WHERE organization_id = $1 AND {number} LIKE $4) + 1)
            ON CONFLICT (organization_id, document_kind, period)
            DO UPDATE SET last_value = document_counters.last_value + 1
            RETURNING last_value
            "#,
            table = self.kind.table(),
            number = c.number,
        );
        let taken = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE organization_id = $1 AND {} = $2)",
            self.kind.table(),
            c.number
        );

        loop {
            let (sequence,): (i32,) = sqlx::query_as(&counter)
                .bind(organization_id)
                .bind(self.kind.as_str())
                .bind(&period)
                .bind(format!("{}%", prefix))
                .fetch_one(&mut **tx)
                .await?;
            let number = format_number(self.kind, issued, sequence as i64);
            let (exists,): (bool,) = sqlx::query_as(&taken)
                .bind(organization_id)
                .bind(&number)
                .fetch_one(&mut **tx)
                .await?;
            if !exists {
                return Ok(number);
            }
        }
    }

    /// Client, project, source estimate and supplier must belong to the same tenant.
    async fn ensure_references(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        input: &DocumentInput,
    ) -> Result<(), ApiError> {
        for reference in references(self.kind, input) {
            let live = if reference.table == "suppliers" {
                "is_active"
            } else {
                "deleted_at IS NULL"
            };
            let found: Option<(i32,)> = sqlx::query_as(&format!(
                "SELECT 1 FROM {} WHERE id = $1 AND organization_id = $2 AND {}",
                reference.table, live
            ))
            .bind(reference.id)
            .bind(organization_id)
            .fetch_optional(&mut **tx)
            .await?;
            if found.is_none() {
                return Err(ApiError::field(reference.field, reference.missing));
            }
        }
        Ok(())
    }

    async fn insert_items(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document_id: Uuid,
        items: &[PricedItem],
    ) -> Result<(), ApiError> {
        let sql = format!(
            r#"
            INSERT INTO {} ({}, sort_order, item_type, custom_type, description, quantity, unit, unit_price, tax_rate, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            self.kind.items_table(),
            self.kind.items_fk()
        );
        for (i, item) in items.iter().enumerate() {
            sqlx::query(&sql)
                .bind(document_id)
                .bind(i as i32 + 1)
                .bind(&item.item_type)
                .bind(&item.custom_type)
                .bind(&item.description)
                .bind(item.quantity)
                .bind(&item.unit)
                .bind(item.unit_price)
                .bind(item.tax_rate)
                .bind(item.amount)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn write_history(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        document_id: Uuid,
        action: &str,
        from: Option<DocumentStatus>,
        to: Option<DocumentStatus>,
        performed_by: Uuid,
        notes: Option<&str>,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO document_history (organization_id, document_kind, document_id, action, from_status, to_status, performed_by, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(organization_id)
        .bind(self.kind.as_str())
        .bind(document_id)
        .bind(action)
        .bind(from.map(|s| s.as_str()))
        .bind(to.map(|s| s.as_str()))
        .bind(performed_by)
        .bind(notes)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn create(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        input: DocumentInput,
    ) -> Result<DocumentDetail, ApiError> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(ApiError::field("title", "Title is required"));
        }
        let (items, totals) = price_items(&input.items)?;
        let issued = input.issue_date.unwrap_or_else(business_today);

        let c = columns(self.kind);
        let link = kind_link(self.kind, &input);
        let (extra_column, extra_value) = match link {
            Some((column, _)) => (format!(", {}", column), ", $13"),
            None => (String::new(), ""),
        };
        let sql = format!(
            r#"
            INSERT INTO {table} (organization_id, {number}, client_id, project_id, title, {issue}, {due},
                                 subtotal, tax_amount, total_amount, notes, created_by{extra_column})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12{extra_value})
            RETURNING id
            "#,
            table = self.kind.table(),
            number = c.number,
            issue = c.issue_date,
            due = c.due_date,
            extra_column = extra_column,
            extra_value = extra_value,
        );

        let mut tx = self.pool.begin().await?;
        self.ensure_references(&mut tx, organization_id, &input).await?;
        let number = match input.number.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => self.next_number(&mut tx, organization_id, issued).await?,
        };
        let mut insert = sqlx::query_as::<_, (Uuid,)>(&sql)
            .bind(organization_id)
            .bind(&number)
            .bind(input.client_id)
            .bind(input.project_id)
            .bind(title)
            .bind(issued)
            .bind(input.due_date)
            .bind(totals.subtotal)
            .bind(totals.tax_amount)
            .bind(totals.total_amount)
            .bind(&input.notes)
            .bind(actor.user_id);
        if let Some((_, value)) = link {
            insert = insert.bind(value);
        }
        let (id,) = insert.fetch_one(&mut *tx).await?;

        self.insert_items(&mut tx, id, &items).await?;
        self.write_history(
            &mut tx,
            organization_id,
            id,
            "created",
            None,
            Some(DocumentStatus::Draft),
            actor.user_id,
            None,
        )
        .await?;
        tx.commit().await?;

        info!("{} {} created in org {}", self.kind.label(), number, organization_id);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "create", self.kind.as_str())
                    .entity(id)
                    .change(None, Some(json!({ "number": number, "total_amount": totals.total_amount }))),
            )
            .await;

        self.detail(organization_id, id).await
    }

    /// Replace header fields and all line items of an editable document.
    pub async fn update(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        id: Uuid,
        input: DocumentInput,
    ) -> Result<DocumentDetail, ApiError> {
        let current = self.fetch(organization_id, id).await?;
        ensure_owner_or_manager(actor, &current, "edit this document")?;
        workflow::ensure_editable(parse_status(&current.status)?)?;

        let title = input.title.trim();
        if title.is_empty() {
            return Err(ApiError::field("title", "Title is required"));
        }
        let (items, totals) = price_items(&input.items)?;
        let c = columns(self.kind);
        let editable: Vec<&str> = [DocumentStatus::Draft, DocumentStatus::Rejected]
            .iter()
            .map(|s| s.as_str())
            .collect();

        let link = kind_link(self.kind, &input);
        let extra_set = link.map(|(column, _)| format!(", {} = $13", column)).unwrap_or_default();
        let sql = format!(
            r#"
            UPDATE {table}
            SET client_id = $3, project_id = $4, title = $5, {issue} = COALESCE($6, {issue}), {due} = $7,
                subtotal = $8, tax_amount = $9, total_amount = $10, notes = $11, updated_at = now(){extra_set}
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL AND status = ANY($12)
            "#,
            table = self.kind.table(),
            issue = c.issue_date,
            due = c.due_date,
            extra_set = extra_set,
        );

        let mut tx = self.pool.begin().await?;
        self.ensure_references(&mut tx, organization_id, &input).await?;
        let mut update = sqlx::query(&sql)
            .bind(id)
            .bind(organization_id)
            .bind(input.client_id)
            .bind(input.project_id)
            .bind(title)
            .bind(input.issue_date)
            .bind(input.due_date)
            .bind(totals.subtotal)
            .bind(totals.tax_amount)
            .bind(totals.total_amount)
            .bind(&input.notes)
            .bind(&editable);
        if let Some((_, value)) = link {
            update = update.bind(value);
        }
        let updated = update.execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            return Err(ApiError::conflict(format!(
                "{} changed status while being edited",
                self.kind.label()
            )));
        }

        sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = $1",
            self.kind.items_table(),
            self.kind.items_fk()
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        self.insert_items(&mut tx, id, &items).await?;
        self.write_history(&mut tx, organization_id, id, "updated", None, None, actor.user_id, None)
            .await?;
        tx.commit().await?;

        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "update", self.kind.as_str())
                    .entity(id)
                    .change(
                        Some(json!({ "total_amount": current.total_amount })),
                        Some(json!({ "total_amount": totals.total_amount })),
                    ),
            )
            .await;

        self.detail(organization_id, id).await
    }

    /// Soft delete.
    pub async fn delete(&self, organization_id: Uuid, actor: &Actor, id: Uuid) -> Result<(), ApiError> {
        let current = self.fetch(organization_id, id).await?;
        ensure_owner_or_manager(actor, &current, "delete this document")?;
        workflow::ensure_deletable(parse_status(&current.status)?)?;

        let deletable: Vec<&str> = [DocumentStatus::Draft, DocumentStatus::Submitted, DocumentStatus::Rejected]
            .iter()
            .map(|s| s.as_str())
            .collect();
        let done = sqlx::query(&format!(
            r#"
            UPDATE {} SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL AND status = ANY($3)
            "#,
            self.kind.table()
        ))
        .bind(id)
        .bind(organization_id)
        .bind(&deletable)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(ApiError::conflict(format!(
                "{} changed status before it could be deleted",
                self.kind.label()
            )));
        }

        info!("{} {} deleted by {}", self.kind.label(), current.number, actor.user_id);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "delete", self.kind.as_str())
                    .entity(id)
                    .change(Some(json!({ "number": current.number, "status": current.status })), None),
            )
            .await;
        Ok(())
    }

    /// Run a workflow action as one guarded update.
    pub async fn transition(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        id: Uuid,
        action: Action,
        reason: Option<&str>,
    ) -> Result<Document, ApiError> {
        if action == Action::RecordPayment {
            return Err(ApiError::bad_request("Use the payment endpoint to record payments"));
        }
        let current = self.fetch(organization_id, id).await?;
        let facts = facts(&current)?;
        let transition = workflow::plan(self.kind, action, actor, &facts)?;
        let reason = if action == Action::Reject {
            Some(workflow::require_reason(reason)?)
        } else {
            reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string)
        };

        let sql = format!(
            r#"
            UPDATE {} SET status = $4, updated_at = now(), {}
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL AND status = ANY($3)
            "#,
            self.kind.table(),
            transition_sets(action, &transition)
        );

        let mut tx = self.pool.begin().await?;
        let done = sqlx::query(&sql)
            .bind(id)
            .bind(organization_id)
            .bind(transition.from_strs())
            .bind(transition.to.as_str())
            .bind(actor.user_id)
            .bind(&reason)
            .execute(&mut *tx)
            .await?;
        if done.rows_affected() == 0 {
            warn!(
                "{} {} lost a race on {} (was {})",
                self.kind.label(),
                id,
                action,
                facts.status
            );
            return Err(ApiError::conflict(format!(
                "{} was changed by another request; reload and try again",
                self.kind.label()
            )));
        }
        self.write_history(
            &mut tx,
            organization_id,
            id,
            action.as_str(),
            Some(facts.status),
            Some(transition.to),
            actor.user_id,
            reason.as_deref(),
        )
        .await?;
        tx.commit().await?;

        info!(
            "{} {} {} -> {} by {}",
            self.kind.label(),
            current.number,
            facts.status,
            transition.to,
            actor.user_id
        );
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, action.as_str(), self.kind.as_str())
                    .entity(id)
                    .change(
                        Some(json!({ "status": facts.status })),
                        Some(json!({ "status": transition.to, "reason": reason })),
                    ),
            )
            .await;
        self.notify_transition(organization_id, actor, &current, &transition, reason.as_deref())
            .await;

        self.fetch(organization_id, id).await
    }

    async fn notify_transition(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        doc: &Document,
        transition: &Transition,
        reason: Option<&str>,
    ) {
        let notifications = NotificationService::new(self.pool.clone());
        let label = self.kind.label();
        let related = self.kind.as_str();

        match transition.to {
            DocumentStatus::Submitted => {
                let roles = workflow::approver_roles(self.kind, doc.total_amount);
                let n = NewNotification::new(
                    "approval_request",
                    format!("{} {} awaits approval", label, doc.number),
                    format!("{} was submitted for approval", doc.title),
                )
                .related(related, doc.id);
                notifications
                    .notify_roles(organization_id, &roles, Some(actor.user_id), &n)
                    .await;
            }
            DocumentStatus::Approved | DocumentStatus::Rejected | DocumentStatus::Paid => {
                if doc.created_by == actor.user_id {
                    return;
                }
                let (kind, verb) = match transition.to {
                    DocumentStatus::Approved => ("approved", "was approved"),
                    DocumentStatus::Rejected => ("rejected", "was rejected"),
                    _ => ("paid", "has been paid"),
                };
                let message = match reason {
                    Some(r) if transition.to == DocumentStatus::Rejected => format!("Reason: {}", r),
                    _ => doc.title.clone(),
                };
                let n = NewNotification::new(kind, format!("{} {} {}", label, doc.number, verb), message)
                    .related(related, doc.id);
                notifications
                    .notify_users(organization_id, &[doc.created_by], &n)
                    .await;
            }
            _ => {}
        }
    }

    /// Record a payment against a sent invoice, settling it once fully paid.
    pub async fn record_payment(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        id: Uuid,
        input: PaymentInput,
    ) -> Result<DocumentDetail, ApiError> {
        if self.kind != DocumentKind::Invoice {
            return Err(workflow::WorkflowError::Unsupported {
                kind: self.kind,
                action: Action::RecordPayment,
            }
            .into());
        }
        let current = self.fetch(organization_id, id).await?;
        let facts = facts(&current)?;
        workflow::plan(self.kind, Action::RecordPayment, actor, &facts)?;
        let outcome = workflow::settle_payment(current.total_amount, current.paid_amount, input.amount)?;

        let mut tx = self.pool.begin().await?;
        let done = sqlx::query(
            r#"
            UPDATE invoices
            SET paid_amount = $3, status = $4, updated_at = now(),
                paid_at = CASE WHEN $4 = 'paid' THEN now() ELSE paid_at END
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
              AND status = 'sent' AND paid_amount = $5
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(outcome.paid_amount)
        .bind(outcome.status.as_str())
        .bind(current.paid_amount)
        .execute(&mut *tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(ApiError::conflict("Invoice was changed by another request; reload and try again"));
        }

        sqlx::query(
            r#"
            INSERT INTO payments (organization_id, invoice_id, amount, payment_date, payment_method, reference_number, notes, recorded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .bind(input.amount)
        .bind(input.payment_date.unwrap_or_else(business_today))
        .bind(input.payment_method.as_deref().unwrap_or("bank_transfer"))
        .bind(&input.reference_number)
        .bind(&input.notes)
        .bind(actor.user_id)
        .execute(&mut *tx)
        .await?;

        let note = format!("Payment of {}", input.amount);
        self.write_history(
            &mut tx,
            organization_id,
            id,
            Action::RecordPayment.as_str(),
            Some(facts.status),
            Some(outcome.status),
            actor.user_id,
            Some(&note),
        )
        .await?;
        tx.commit().await?;

        info!(
            "Invoice {} received {} (paid {} of {})",
            current.number, input.amount, outcome.paid_amount, current.total_amount
        );
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "record_payment", "invoice")
                    .entity(id)
                    .change(
                        Some(json!({ "paid_amount": current.paid_amount, "status": current.status })),
                        Some(json!({ "paid_amount": outcome.paid_amount, "status": outcome.status })),
                    ),
            )
            .await;
        if outcome.status == DocumentStatus::Paid {
            let transition = Transition {
                from: vec![DocumentStatus::Sent],
                to: DocumentStatus::Paid,
                auto_approved: false,
            };
            self.notify_transition(organization_id, actor, &current, &transition, None)
                .await;
        }

        self.detail(organization_id, id).await
    }

    /// Approve many purchase orders, each under the single-document rules.
    pub async fn bulk_approve(&self, organization_id: Uuid, actor: &Actor, ids: &[Uuid]) -> Result<BulkOutcome, ApiError> {
        let ids = workflow::bulk_ids(ids)?;
        let mut outcome = BulkOutcome::default();

        for id in ids {
            match self.transition(organization_id, actor, id, Action::Approve, None).await {
                Ok(_) => outcome.approved_ids.push(id),
                Err(ApiError::NotFound(msg))
                | Err(ApiError::Forbidden(msg))
                | Err(ApiError::BadRequest(msg))
                | Err(ApiError::Conflict(msg)) => outcome.skipped.push(BulkSkip { id, reason: msg }),
                Err(e) => {
                    warn!("Bulk approve of {} failed: {}", id, e);
                    outcome.failed_ids.push(id);
                }
            }
        }

        info!(
            "Bulk approve by {}: {} approved, {} skipped, {} failed",
            actor.user_id,
            outcome.approved_ids.len(),
            outcome.skipped.len(),
            outcome.failed_ids.len()
        );
        Ok(outcome)
    }

    pub async fn pdf(&self, organization_id: Uuid, id: Uuid) -> Result<Attachment, ApiError> {
        let doc = self.fetch(organization_id, id).await?;
        let items = self.items(id).await?;
        let (organization_name,): (String,) = sqlx::query_as("SELECT name FROM organizations WHERE id = $1")
            .bind(organization_id)
            .fetch_one(&self.pool)
            .await?;

        let printable = PrintableDocument {
            kind: self.kind,
            number: &doc.number,
            title: &doc.title,
            issue_date: doc.issue_date,
            due_date: doc.due_date,
            organization_name: &organization_name,
            counterparty: doc.client_name.as_deref(),
            items: &items,
            subtotal: doc.subtotal,
            tax_amount: doc.tax_amount,
            total_amount: doc.total_amount,
            notes: doc.notes.as_deref(),
        };
        let body = render_document(&printable)?;
        Ok(Attachment::pdf(format!("{}.pdf", doc.number), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(quantity: i64, unit_price: i64, tax_rate: Option<i64>) -> LineItemInput {
        LineItemInput {
            item_type: None,
            custom_type: None,
            description: "Scaffolding".to_string(),
            quantity: Decimal::from(quantity),
            unit: Some("set".to_string()),
            unit_price: Decimal::from(unit_price),
            tax_rate: tax_rate.map(Decimal::from),
        }
    }

    fn input(client: Option<Uuid>, project: Option<Uuid>, estimate: Option<Uuid>) -> DocumentInput {
        DocumentInput {
            number: None,
            client_id: client,
            project_id: project,
            estimate_id: estimate,
            supplier_id: None,
            title: "Exterior works".to_string(),
            issue_date: None,
            due_date: None,
            notes: None,
            items: Vec::new(),
        }
    }

    #[test]
    fn every_linked_row_is_checked_against_the_tenant() {
        let (client, project, estimate) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let linked = input(Some(client), Some(project), Some(estimate));

        let tables: Vec<(&str, Uuid)> = references(DocumentKind::Invoice, &linked)
            .iter()
            .map(|r| (r.table, r.id))
            .collect();
        assert_eq!(tables, vec![("clients", client), ("projects", project), ("estimates", estimate)]);

        // Only invoices carry a source estimate.
        let tables: Vec<&str> = references(DocumentKind::PurchaseOrder, &linked)
            .iter()
            .map(|r| r.table)
            .collect();
        assert_eq!(tables, vec!["clients", "projects"]);

        assert!(references(DocumentKind::Estimate, &input(None, None, None)).is_empty());

        let supplier = Uuid::new_v4();
        let ordered = DocumentInput {
            supplier_id: Some(supplier),
            ..input(None, None, None)
        };
        let tables: Vec<(&str, &str)> = references(DocumentKind::PurchaseOrder, &ordered)
            .iter()
            .map(|r| (r.table, r.field))
            .collect();
        assert_eq!(tables, vec![("suppliers", "supplier_id")]);
        assert!(references(DocumentKind::Invoice, &ordered).is_empty());
    }

    #[test]
    fn totals_are_recomputed_per_rate() {
        let items = vec![line(3, 1_001, Some(10)), line(1, 999, Some(8)), line(2, 500, Some(10))];
        let (priced, totals) = price_items(&items).unwrap();

        assert_eq!(priced[0].amount, Decimal::from(3_003));
        assert_eq!(priced[0].item_type, "other");
        // 10%: 4003 -> 400, 8%: 999 -> 79
        assert_eq!(totals.subtotal, Decimal::from(5_002));
        assert_eq!(totals.tax_amount, Decimal::from(479));
        assert_eq!(totals.total_amount, Decimal::from(5_481));
    }

    #[test]
    fn fractional_quantities_round_to_whole_yen() {
        let mut item = line(0, 333, Some(0));
        item.quantity = Decimal::new(15, 1);
        let (priced, totals) = price_items(&[item]).unwrap();
        assert_eq!(priced[0].amount, Decimal::from(500));
        assert_eq!(totals.tax_amount, Decimal::ZERO);
    }

    #[test]
    fn missing_rate_uses_configured_tax() {
        let (priced, _) = price_items(&[line(1, 100, None)]).unwrap();
        assert_eq!(priced[0].tax_rate, Decimal::from(config::config().billing.tax_rate_percent));
    }

    #[test]
    fn invalid_lines_name_the_field() {
        let mut blank = line(1, 100, None);
        blank.description = "  ".to_string();
        let err = price_items(&[line(1, 100, None), blank]).unwrap_err();
        assert_eq!(err.to_json()["field_errors"]["items[1].description"], "Description is required");

        let err = price_items(&[line(0, 100, None)]).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = price_items(&[line(1, 100, Some(150))]).unwrap_err();
        assert!(err.to_json()["field_errors"]["items[0].tax_rate"].is_string());
    }

    #[test]
    fn numbers_are_prefixed_by_kind_and_month() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 9).unwrap();
        assert_eq!(format_number(DocumentKind::Estimate, date, 7), "EST-202604-0007");
        assert_eq!(format_number(DocumentKind::PurchaseOrder, date, 12345), "PO-202604-12345");
    }

    #[test]
    fn submit_that_auto_approves_stamps_approver() {
        let t = Transition {
            from: vec![DocumentStatus::Draft],
            to: DocumentStatus::Approved,
            auto_approved: true,
        };
        assert!(transition_sets(Action::Submit, &t).contains("submitted_at"));
        assert!(!transition_sets(Action::Approve, &t).contains("submitted_at"));
    }
}
