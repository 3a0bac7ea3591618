//! Monthly platform invoices, their payment state and Stripe webhooks.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::stripe::{construct_event, Collection, StripeClient, StripeError, WebhookEvent};
use crate::billing::{self, FeeBreakdown};
use crate::config;
use crate::database::models::{BillingInvoice, Contract};
use crate::error::ApiError;
use crate::mail::{mailer_from_config, Email, Mailer};
use crate::types::{Listing, Page};

use super::admin_service::{AdminLog, AdminService};

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub organization_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Serialize)]
pub struct BillingRun {
    pub date: Option<NaiveDate>,
    pub created: Vec<Uuid>,
    /// Contracts already billed for this period.
    pub skipped: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
    /// A billing event that found no invoice. Left unprocessed so a
    /// redelivery is applied.
    Unmatched,
}

impl WebhookOutcome {
    /// Whether the stored event can be marked processed.
    pub fn is_settled(&self) -> bool {
        !matches!(self, WebhookOutcome::Unmatched)
    }
}

/// Whole yen as Stripe's smallest currency unit.
pub fn stripe_amount(total: Decimal) -> Result<i64, StripeError> {
    if total.is_sign_negative() || total.fract() != Decimal::ZERO {
        return Err(StripeError::Payload(format!("Cannot charge an amount of {}", total)));
    }
    total
        .to_i64()
        .ok_or_else(|| StripeError::Payload(format!("Amount {} is out of range", total)))
}

/// Billing invoice status a Stripe event moves to, if it is one we act on.
pub fn status_for_event(event_type: &str) -> Option<&'static str> {
    match event_type {
        "invoice.paid" | "invoice.payment_succeeded" => Some("paid"),
        "invoice.payment_failed" => Some("failed"),
        _ => None,
    }
}

fn invoice_email(contract: &Contract, invoice: &BillingInvoice, fee: &FeeBreakdown) -> String {
    format!(
        "Invoice {number}\n\nPlan: {plan}\nPeriod: {start} - {end}\nBase fee: ¥{base}\nUser fee: ¥{users}\nDiscount: ¥{discount}\nSubtotal: ¥{subtotal}\nTax: ¥{tax}\nTotal: ¥{total}\n\nPlease pay by {due}.",
        number = invoice.invoice_number,
        plan = contract.plan,
        start = invoice.billing_period_start,
        end = invoice.billing_period_end,
        base = fee.base_fee,
        users = fee.user_fee,
        discount = fee.discount,
        subtotal = fee.subtotal,
        tax = fee.tax,
        total = fee.total,
        due = invoice.due_date,
    )
}

pub struct BillingService {
    pool: PgPool,
    mailer: Arc<dyn Mailer>,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            mailer: mailer_from_config(),
        }
    }

    pub async fn list(&self, query: &InvoiceQuery) -> Result<Listing<BillingInvoice>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let filter = r#"
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR status = $2)
        "#;
        let items: Vec<BillingInvoice> = sqlx::query_as(&format!(
            "SELECT * FROM billing_invoices {} ORDER BY billing_period_start DESC, created_at DESC LIMIT $3 OFFSET $4",
            filter
        ))
        .bind(query.organization_id)
        .bind(&query.status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM billing_invoices {}", filter))
            .bind(query.organization_id)
            .bind(&query.status)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    /// Record a bank transfer against a sent or failed invoice.
    pub async fn mark_paid(&self, super_admin_id: Uuid, id: Uuid, meta: AdminLog<'_>) -> Result<BillingInvoice, ApiError> {
        let current: BillingInvoice = sqlx::query_as("SELECT * FROM billing_invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Billing invoice not found"))?;
        if !matches!(current.status.as_str(), "sent" | "failed") {
            return Err(ApiError::bad_request(format!("A {} invoice cannot be marked paid", current.status)));
        }

        let invoice: BillingInvoice = sqlx::query_as(
            r#"
            UPDATE billing_invoices SET status = 'paid', paid_at = now()
            WHERE id = $1 AND status IN ('sent', 'failed')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::conflict("Invoice status changed concurrently"))?;

        info!("Billing invoice {} marked paid", invoice.invoice_number);
        AdminService::new(self.pool.clone())
            .log(
                Some(super_admin_id),
                "billing_invoice_paid",
                json!({ "invoice_id": id, "invoice_number": invoice.invoice_number }),
                meta,
            )
            .await;
        Ok(invoice)
    }

    /// Bill every active contract whose billing day is `today`. Running twice
    /// for the same day bills nothing twice.
    pub async fn create_monthly_invoices(&self, today: NaiveDate) -> Result<BillingRun, ApiError> {
        let contracts: Vec<Contract> = sqlx::query_as(
            r#"
            SELECT * FROM contracts
            WHERE status = 'active' AND start_date <= $1 AND (end_date IS NULL OR end_date >= $1)
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let mut run = BillingRun {
            date: Some(today),
            ..Default::default()
        };
        for contract in contracts
            .into_iter()
            .filter(|c| billing::is_billing_day(c.billing_day.max(1) as u32, today))
        {
            match self.bill_contract(contract.clone(), today).await {
                Ok(Some(invoice)) => run.created.push(invoice.id),
                Ok(None) => run.skipped.push(contract.id),
                Err(e) => {
                    error!("Billing contract {} failed: {}", contract.id, e);
                    run.failed.push(contract.id);
                }
            }
        }

        info!(
            "Monthly billing for {}: {} created, {} skipped, {} failed",
            today,
            run.created.len(),
            run.skipped.len(),
            run.failed.len()
        );
        Ok(run)
    }

    async fn bill_contract(&self, contract: Contract, today: NaiveDate) -> Result<Option<BillingInvoice>, ApiError> {
        let contract: Contract = sqlx::query_as(
            r#"
            UPDATE contracts SET user_count = (
                SELECT COUNT(*) FROM users
                WHERE organization_id = contracts.organization_id AND is_active AND deleted_at IS NULL
            ), updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(contract.id)
        .fetch_one(&self.pool)
        .await?;

        let fee = billing::monthly_fee(&contract, config::config().billing.tax_rate_percent);
        let (period_start, period_end) = billing::billing_period(contract.billing_day.max(1) as u32, today);
        let invoice: Option<BillingInvoice> = sqlx::query_as(
            r#"
            INSERT INTO billing_invoices (contract_id, organization_id, invoice_number, billing_period_start,
                                          billing_period_end, subtotal, tax, total, status, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'sent', $9)
            ON CONFLICT (contract_id, billing_period_start) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(contract.id)
        .bind(contract.organization_id)
        .bind(billing::invoice_number(&contract, today))
        .bind(period_start)
        .bind(period_end)
        .bind(fee.subtotal)
        .bind(fee.tax)
        .bind(fee.total)
        .bind(billing::due_date(today))
        .fetch_optional(&self.pool)
        .await?;

        let Some(invoice) = invoice else {
            return Ok(None);
        };

        if contract.payment_method == "card" {
            if let Err(e) = self.charge_card(&contract, &invoice, &fee).await {
                sqlx::query("UPDATE billing_invoices SET status = 'failed' WHERE id = $1")
                    .bind(invoice.id)
                    .execute(&self.pool)
                    .await?;
                return Err(e.into());
            }
        } else {
            self.email_invoice(&contract, &invoice, &fee).await;
        }
        Ok(Some(invoice))
    }

    async fn charge_card(&self, contract: &Contract, invoice: &BillingInvoice, fee: &FeeBreakdown) -> Result<(), StripeError> {
        let customer = contract.stripe_customer_id.as_deref().ok_or(StripeError::NotConfigured)?;
        let client = StripeClient::from_config()?;
        let amount = stripe_amount(fee.total)?;
        let description = format!("{} plan {} - {}", contract.plan, invoice.billing_period_start, invoice.billing_period_end);

        client.create_invoice_item(customer, amount, &description).await?;
        let stripe_invoice = client
            .create_invoice(
                customer,
                &description,
                Collection::ChargeAutomatically,
                &[
                    ("billing_invoice_id", invoice.id.to_string()),
                    ("invoice_number", invoice.invoice_number.clone()),
                ],
            )
            .await?;

        // Webhooks fall back to the `billing_invoice_id` metadata when this link is missing.
        if let Err(e) = sqlx::query("UPDATE billing_invoices SET stripe_invoice_id = $2 WHERE id = $1")
            .bind(invoice.id)
            .bind(&stripe_invoice.id)
            .execute(&self.pool)
            .await
        {
            error!("Stripe invoice {} not linked to {}: {}", stripe_invoice.id, invoice.id, e);
        }
        Ok(())
    }

    async fn email_invoice(&self, contract: &Contract, invoice: &BillingInvoice, fee: &FeeBreakdown) {
        let recipient: Option<(Option<String>,)> = sqlx::query_as("SELECT billing_email FROM organizations WHERE id = $1")
            .bind(contract.organization_id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                error!("Could not look up billing email for org {}: {}", contract.organization_id, e);
                None
            });
        let Some(to) = recipient.and_then(|(email,)| email) else {
            warn!("Org {} has no billing email; invoice {} not mailed", contract.organization_id, invoice.invoice_number);
            return;
        };

        let email = Email::new(to, format!("Invoice {}", invoice.invoice_number), invoice_email(contract, invoice, fee));
        if let Err(e) = self.mailer.send(&email).await {
            error!("Invoice {} email failed: {}", invoice.invoice_number, e);
        }
    }

    /// Verify, record and apply a Stripe webhook. Deliveries already
    /// processed are acknowledged without being applied again.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome, ApiError> {
        let event = construct_event(payload, signature)?;
        let raw: Value = serde_json::from_slice(payload).unwrap_or(Value::Null);

        let fresh: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_events (id, event_type, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET event_type = EXCLUDED.event_type
            WHERE stripe_events.processed_at IS NULL
            RETURNING id
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(&raw)
        .fetch_optional(&self.pool)
        .await?;
        if fresh.is_none() {
            info!("Stripe event {} already processed", event.id);
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.apply_event(&event).await {
            Ok(outcome) if outcome.is_settled() => {
                sqlx::query("UPDATE stripe_events SET processed_at = now(), error_message = NULL WHERE id = $1")
                    .bind(&event.id)
                    .execute(&self.pool)
                    .await?;
                Ok(outcome)
            }
            Ok(_) => {
                let message = format!("Stripe invoice {} matched no billing invoice", event.object_id().unwrap_or("?"));
                self.record_failure(&event.id, &message).await?;
                Err(ApiError::conflict(message))
            }
            Err(e) => {
                self.record_failure(&event.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn record_failure(&self, event_id: &str, message: &str) -> Result<(), ApiError> {
        sqlx::query("UPDATE stripe_events SET error_message = $2 WHERE id = $1")
            .bind(event_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Match by Stripe invoice id, or by our own id in the event metadata
    /// when the link was never stored. A paid invoice stays paid.
    async fn apply_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome, ApiError> {
        let Some(status) = status_for_event(&event.event_type) else {
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(stripe_invoice_id) = event.object_id() else {
            return Err(ApiError::bad_request("Event object has no id"));
        };
        let billing_invoice_id = event
            .metadata("billing_invoice_id")
            .and_then(|id| id.parse::<Uuid>().ok());

        let updated: Option<(String, String)> = sqlx::query_as(
            r#"
            WITH target AS (
                SELECT id FROM billing_invoices
                WHERE stripe_invoice_id = $1 OR (stripe_invoice_id IS NULL AND id = $2)
                ORDER BY (stripe_invoice_id IS NOT DISTINCT FROM $1) DESC
                LIMIT 1
            )
            UPDATE billing_invoices b
            SET status = CASE WHEN b.status = 'paid' THEN b.status ELSE $3 END,
                paid_at = CASE WHEN b.status <> 'paid' AND $3 = 'paid' THEN now() ELSE b.paid_at END,
                stripe_invoice_id = $1
            FROM target
            WHERE b.id = target.id
            RETURNING b.invoice_number, b.status
            "#,
        )
        .bind(stripe_invoice_id)
        .bind(billing_invoice_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((number, now)) => {
                info!("Billing invoice {} is {} after Stripe {}", number, now, event.event_type);
                Ok(WebhookOutcome::Processed)
            }
            None if billing_invoice_id.is_none() => {
                info!("Stripe invoice {} is not one of ours", stripe_invoice_id);
                Ok(WebhookOutcome::Ignored)
            }
            None => {
                warn!("Stripe invoice {} matched no billing invoice", stripe_invoice_id);
                Ok(WebhookOutcome::Unmatched)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_mapping() {
        assert_eq!(status_for_event("invoice.paid"), Some("paid"));
        assert_eq!(status_for_event("invoice.payment_succeeded"), Some("paid"));
        assert_eq!(status_for_event("invoice.payment_failed"), Some("failed"));
        assert_eq!(status_for_event("customer.created"), None);
    }

    #[test]
    fn only_unmatched_events_stay_open() {
        assert!(WebhookOutcome::Processed.is_settled());
        assert!(WebhookOutcome::Ignored.is_settled());
        assert!(!WebhookOutcome::Unmatched.is_settled());
    }

    #[test]
    fn stripe_amount_refuses_what_it_cannot_charge() {
        assert_eq!(stripe_amount(Decimal::from(33_000)).unwrap(), 33_000);
        assert_eq!(stripe_amount(Decimal::ZERO).unwrap(), 0);
        assert!(stripe_amount(Decimal::from(-1)).is_err());
        assert!(stripe_amount(Decimal::new(10_05, 2)).is_err());
        assert!(stripe_amount(Decimal::MAX).is_err());
    }
}
