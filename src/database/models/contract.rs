use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan: String,
    pub status: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub billing_day: i32,
    pub monthly_base_fee: Decimal,
    pub per_user_fee: Decimal,
    pub user_count: i32,
    pub discount: Decimal,
    pub payment_method: String,
    pub stripe_customer_id: Option<String>,
    pub pending_plan: Option<String>,
    pub pending_base_fee: Option<Decimal>,
    pub plan_change_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Platform invoice billed to a tenant for its contract.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingInvoice {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub organization_id: Uuid,
    pub invoice_number: String,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: String,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_invoice_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
