//! Tenant contracts: terms, completion and scheduled plan changes.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::models::Contract;
use crate::error::ApiError;
use crate::types::{business_today, Listing, Page};

use super::admin_service::{AdminLog, AdminService};

#[derive(Debug, Deserialize)]
pub struct NewContract {
    pub organization_id: Uuid,
    pub plan: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub billing_day: i32,
    pub monthly_base_fee: Decimal,
    #[serde(default)]
    pub per_user_fee: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    pub stripe_customer_id: Option<String>,
}

fn default_payment_method() -> String {
    "invoice".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ContractUpdate {
    pub end_date: Option<NaiveDate>,
    pub billing_day: Option<i32>,
    pub monthly_base_fee: Option<Decimal>,
    pub per_user_fee: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub payment_method: Option<String>,
    pub stripe_customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlanChange {
    pub plan: String,
    pub monthly_base_fee: Option<Decimal>,
    pub effective_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct CompleteContract {
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContractQuery {
    pub organization_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Shared checks for new and updated terms.
pub fn validate_terms(
    billing_day: i32,
    fees: &[(&str, Decimal)],
    payment_method: &str,
    stripe_customer_id: Option<&str>,
) -> Result<(), ApiError> {
    if !(1..=31).contains(&billing_day) {
        return Err(ApiError::field("billing_day", "Billing day must be between 1 and 31"));
    }
    for (field, fee) in fees {
        if fee.is_sign_negative() {
            return Err(ApiError::field(*field, "Amount cannot be negative"));
        }
    }
    match payment_method {
        "invoice" => Ok(()),
        "card" if stripe_customer_id.map_or(false, |id| !id.trim().is_empty()) => Ok(()),
        "card" => Err(ApiError::field("stripe_customer_id", "Card billing needs a Stripe customer")),
        _ => Err(ApiError::field("payment_method", "Payment method must be invoice or card")),
    }
}

pub struct ContractService {
    pool: PgPool,
}

impl ContractService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, query: &ContractQuery) -> Result<Listing<Contract>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let filter = r#"
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR status = $2)
        "#;
        let items: Vec<Contract> = sqlx::query_as(&format!(
            "SELECT * FROM contracts {} ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            filter
        ))
        .bind(query.organization_id)
        .bind(&query.status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM contracts {}", filter))
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

    pub async fn fetch(&self, id: Uuid) -> Result<Contract, ApiError> {
        sqlx::query_as("SELECT * FROM contracts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Contract not found"))
    }

    /// An organization holds at most one active contract.
    pub async fn create(&self, super_admin_id: Uuid, input: NewContract, meta: AdminLog<'_>) -> Result<Contract, ApiError> {
        validate_terms(
            input.billing_day,
            &[
                ("monthly_base_fee", input.monthly_base_fee),
                ("per_user_fee", input.per_user_fee),
                ("discount", input.discount),
            ],
            &input.payment_method,
            input.stripe_customer_id.as_deref(),
        )?;
        if input.end_date.map_or(false, |end| end < input.start_date) {
            return Err(ApiError::field("end_date", "End date is before the start date"));
        }

        let contract: Contract = sqlx::query_as(
            r#"
            INSERT INTO contracts (organization_id, plan, start_date, end_date, billing_day, monthly_base_fee,
                                   per_user_fee, discount, payment_method, stripe_customer_id, user_count)
            SELECT o.id, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                   (SELECT COUNT(*) FROM users u WHERE u.organization_id = o.id AND u.is_active AND u.deleted_at IS NULL)
            FROM organizations o
            WHERE o.id = $1 AND o.deleted_at IS NULL
              AND NOT EXISTS (SELECT 1 FROM contracts c WHERE c.organization_id = o.id AND c.status = 'active')
            RETURNING *
            "#,
        )
        .bind(input.organization_id)
        .bind(&input.plan)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.billing_day)
        .bind(input.monthly_base_fee)
        .bind(input.per_user_fee)
        .bind(input.discount)
        .bind(&input.payment_method)
        .bind(&input.stripe_customer_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::conflict("Organization not found or already has an active contract"))?;

        sqlx::query("UPDATE organizations SET plan = $2, updated_at = now() WHERE id = $1")
            .bind(contract.organization_id)
            .bind(&contract.plan)
            .execute(&self.pool)
            .await?;

        info!("Contract {} created for org {}", contract.id, contract.organization_id);
        AdminService::new(self.pool.clone())
            .log(
                Some(super_admin_id),
                "contract_created",
                json!({ "contract_id": contract.id, "organization_id": contract.organization_id, "plan": contract.plan }),
                meta,
            )
            .await;
        Ok(contract)
    }

    pub async fn update(
        &self,
        super_admin_id: Uuid,
        id: Uuid,
        input: ContractUpdate,
        meta: AdminLog<'_>,
    ) -> Result<Contract, ApiError> {
        let current = self.fetch(id).await?;
        if current.status != "active" {
            return Err(ApiError::bad_request(format!("A {} contract cannot be changed", current.status)));
        }
        let payment_method = input.payment_method.clone().unwrap_or_else(|| current.payment_method.clone());
        let stripe_customer_id = input.stripe_customer_id.clone().or_else(|| current.stripe_customer_id.clone());
        validate_terms(
            input.billing_day.unwrap_or(current.billing_day),
            &[
                ("monthly_base_fee", input.monthly_base_fee.unwrap_or(current.monthly_base_fee)),
                ("per_user_fee", input.per_user_fee.unwrap_or(current.per_user_fee)),
                ("discount", input.discount.unwrap_or(current.discount)),
            ],
            &payment_method,
            stripe_customer_id.as_deref(),
        )?;

        let contract: Contract = sqlx::query_as(
            r#"
            UPDATE contracts SET
                end_date = COALESCE($2, end_date),
                billing_day = COALESCE($3, billing_day),
                monthly_base_fee = COALESCE($4, monthly_base_fee),
                per_user_fee = COALESCE($5, per_user_fee),
                discount = COALESCE($6, discount),
                payment_method = $7,
                stripe_customer_id = $8,
                updated_at = now()
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.end_date)
        .bind(input.billing_day)
        .bind(input.monthly_base_fee)
        .bind(input.per_user_fee)
        .bind(input.discount)
        .bind(&payment_method)
        .bind(&stripe_customer_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::conflict("Contract is no longer active"))?;

        AdminService::new(self.pool.clone())
            .log(Some(super_admin_id), "contract_updated", json!({ "contract_id": id }), meta)
            .await;
        Ok(contract)
    }

    /// End an active contract. Users are deactivated by the cron job once the
    /// end date has passed.
    pub async fn complete(
        &self,
        super_admin_id: Uuid,
        id: Uuid,
        input: CompleteContract,
        meta: AdminLog<'_>,
    ) -> Result<Contract, ApiError> {
        let end_date = input.end_date.unwrap_or_else(business_today);
        let contract: Contract = sqlx::query_as(
            r#"
            UPDATE contracts SET status = 'completed', end_date = $2,
                pending_plan = NULL, pending_base_fee = NULL, plan_change_date = NULL, updated_at = now()
            WHERE id = $1 AND status = 'active' AND start_date <= $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(end_date)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::conflict("Contract is not active or ends before it starts"))?;

        info!("Contract {} completed as of {}", id, end_date);
        AdminService::new(self.pool.clone())
            .log(
                Some(super_admin_id),
                "contract_completed",
                json!({ "contract_id": id, "end_date": end_date }),
                meta,
            )
            .await;
        Ok(contract)
    }

    pub async fn schedule_plan_change(
        &self,
        super_admin_id: Uuid,
        id: Uuid,
        input: PlanChange,
        meta: AdminLog<'_>,
    ) -> Result<Contract, ApiError> {
        if input.plan.trim().is_empty() {
            return Err(ApiError::field("plan", "Plan is required"));
        }
        if input.effective_date <= business_today() {
            return Err(ApiError::field("effective_date", "Plan changes take effect on a future date"));
        }
        if input.monthly_base_fee.map_or(false, |fee| fee.is_sign_negative()) {
            return Err(ApiError::field("monthly_base_fee", "Amount cannot be negative"));
        }

        let contract: Contract = sqlx::query_as(
            r#"
            UPDATE contracts SET pending_plan = $2, pending_base_fee = $3, plan_change_date = $4, updated_at = now()
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.plan.trim())
        .bind(input.monthly_base_fee)
        .bind(input.effective_date)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Active contract not found"))?;

        AdminService::new(self.pool.clone())
            .log(
                Some(super_admin_id),
                "plan_change_scheduled",
                json!({ "contract_id": id, "plan": input.plan, "effective_date": input.effective_date }),
                meta,
            )
            .await;
        Ok(contract)
    }

    /// Apply every scheduled plan change due on or before `today`.
    pub async fn apply_plan_changes(&self, today: NaiveDate) -> Result<Vec<Contract>, ApiError> {
        let mut tx = self.pool.begin().await?;
        let applied: Vec<Contract> = sqlx::query_as(
            r#"
            UPDATE contracts SET
                plan = pending_plan,
                monthly_base_fee = COALESCE(pending_base_fee, monthly_base_fee),
                pending_plan = NULL, pending_base_fee = NULL, plan_change_date = NULL,
                updated_at = now()
            WHERE status = 'active' AND pending_plan IS NOT NULL AND plan_change_date <= $1
            RETURNING *
            "#,
        )
        .bind(today)
        .fetch_all(&mut *tx)
        .await?;

        for contract in &applied {
            sqlx::query("UPDATE organizations SET plan = $2, updated_at = now() WHERE id = $1")
                .bind(contract.organization_id)
                .bind(&contract.plan)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        for contract in &applied {
            info!("Contract {} moved to plan {}", contract.id, contract.plan);
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_validation() {
        let fees = [("monthly_base_fee", Decimal::from(30000))];
        assert!(validate_terms(25, &fees, "invoice", None).is_ok());
        assert!(validate_terms(0, &fees, "invoice", None).is_err());
        assert!(validate_terms(32, &fees, "invoice", None).is_err());
        assert!(validate_terms(10, &[("discount", Decimal::from(-1))], "invoice", None).is_err());
    }

    #[test]
    fn card_billing_needs_customer() {
        assert!(validate_terms(1, &[], "card", None).is_err());
        assert!(validate_terms(1, &[], "card", Some(" ")).is_err());
        assert!(validate_terms(1, &[], "card", Some("cus_123")).is_ok());
        assert!(validate_terms(1, &[], "cash", None).is_err());
    }
}
