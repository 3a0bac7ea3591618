//! Back-office sales CRM: leads and their activity log.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{SalesActivity, SalesLead};
use crate::error::ApiError;
use crate::types::{Listing, Page};

use super::admin_service::{AdminLog, AdminService};

pub const LEAD_STATUSES: [&str; 6] = ["new", "contacted", "proposal", "negotiation", "won", "lost"];
pub const ACTIVITY_TYPES: [&str; 4] = ["call", "email", "meeting", "note"];

#[derive(Debug, Deserialize)]
pub struct NewLead {
    pub company_name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub assigned_to: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeadStatusUpdate {
    pub status: String,
    /// Tenant created from a won lead.
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct NewActivity {
    pub activity_type: String,
    pub summary: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadQuery {
    pub status: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Closed leads stay closed; anything open may move anywhere.
pub fn check_lead_transition(from: &str, to: &str) -> Result<(), ApiError> {
    if !LEAD_STATUSES.contains(&to) {
        return Err(ApiError::field("status", format!("Must be one of {}", LEAD_STATUSES.join(", "))));
    }
    if matches!(from, "won" | "lost") {
        return Err(ApiError::bad_request(format!("Lead is already {}", from)));
    }
    if from == to {
        return Err(ApiError::bad_request(format!("Lead is already {}", to)));
    }
    Ok(())
}

pub struct SalesService {
    pool: PgPool,
}

impl SalesService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_leads(&self, query: &LeadQuery) -> Result<Listing<SalesLead>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| format!("%{}%", s));
        let filter = r#"
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR assigned_to = $2)
              AND ($3::text IS NULL OR company_name ILIKE $3 OR contact_name ILIKE $3)
        "#;
        let items: Vec<SalesLead> = sqlx::query_as(&format!(
            "SELECT * FROM sales_leads {} ORDER BY updated_at DESC LIMIT $4 OFFSET $5",
            filter
        ))
        .bind(&query.status)
        .bind(query.assigned_to)
        .bind(&search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM sales_leads {}", filter))
            .bind(&query.status)
            .bind(query.assigned_to)
            .bind(&search)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    async fn fetch_lead(&self, id: Uuid) -> Result<SalesLead, ApiError> {
        sqlx::query_as("SELECT * FROM sales_leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Lead not found"))
    }

    pub async fn create_lead(&self, super_admin_id: Uuid, input: NewLead, meta: AdminLog<'_>) -> Result<SalesLead, ApiError> {
        if input.company_name.trim().is_empty() {
            return Err(ApiError::field("company_name", "Company name is required"));
        }
        let lead: SalesLead = sqlx::query_as(
            r#"
            INSERT INTO sales_leads (company_name, contact_name, email, phone, source, estimated_value, assigned_to, notes)
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, $9), $8)
            RETURNING *
            "#,
        )
        .bind(input.company_name.trim())
        .bind(&input.contact_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.source)
        .bind(input.estimated_value)
        .bind(input.assigned_to)
        .bind(&input.notes)
        .bind(super_admin_id)
        .fetch_one(&self.pool)
        .await?;

        AdminService::new(self.pool.clone())
            .log(Some(super_admin_id), "lead_created", json!({ "lead_id": lead.id }), meta)
            .await;
        Ok(lead)
    }

    pub async fn update_status(
        &self,
        super_admin_id: Uuid,
        id: Uuid,
        input: LeadStatusUpdate,
        meta: AdminLog<'_>,
    ) -> Result<SalesLead, ApiError> {
        let lead = self.fetch_lead(id).await?;
        check_lead_transition(&lead.status, &input.status)?;

        let updated: SalesLead = sqlx::query_as(
            r#"
            UPDATE sales_leads SET status = $2, organization_id = COALESCE($3, organization_id), updated_at = now()
            WHERE id = $1 AND status = $4
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.status)
        .bind(input.organization_id)
        .bind(&lead.status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::conflict("Lead status changed concurrently"))?;

        sqlx::query(
            "INSERT INTO sales_activities (lead_id, super_admin_id, activity_type, summary) VALUES ($1, $2, 'note', $3)",
        )
        .bind(id)
        .bind(super_admin_id)
        .bind(format!("Status {} -> {}", lead.status, updated.status))
        .execute(&self.pool)
        .await?;

        AdminService::new(self.pool.clone())
            .log(
                Some(super_admin_id),
                "lead_status_changed",
                json!({ "lead_id": id, "from": lead.status, "to": updated.status }),
                meta,
            )
            .await;
        Ok(updated)
    }

    pub async fn activities(&self, lead_id: Uuid) -> Result<Vec<SalesActivity>, ApiError> {
        self.fetch_lead(lead_id).await?;
        let activities = sqlx::query_as("SELECT * FROM sales_activities WHERE lead_id = $1 ORDER BY occurred_at DESC")
            .bind(lead_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(activities)
    }

    pub async fn add_activity(&self, super_admin_id: Uuid, lead_id: Uuid, input: NewActivity) -> Result<SalesActivity, ApiError> {
        if !ACTIVITY_TYPES.contains(&input.activity_type.as_str()) {
            return Err(ApiError::field(
                "activity_type",
                format!("Must be one of {}", ACTIVITY_TYPES.join(", ")),
            ));
        }
        if input.summary.trim().is_empty() {
            return Err(ApiError::field("summary", "Summary is required"));
        }
        self.fetch_lead(lead_id).await?;

        let activity: SalesActivity = sqlx::query_as(
            r#"
            INSERT INTO sales_activities (lead_id, super_admin_id, activity_type, summary)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(lead_id)
        .bind(super_admin_id)
        .bind(&input.activity_type)
        .bind(input.summary.trim())
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("UPDATE sales_leads SET updated_at = now() WHERE id = $1")
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_transitions() {
        assert!(check_lead_transition("new", "contacted").is_ok());
        assert!(check_lead_transition("proposal", "won").is_ok());
        assert!(check_lead_transition("won", "lost").is_err());
        assert!(check_lead_transition("new", "new").is_err());
        assert_eq!(check_lead_transition("new", "archived").unwrap_err().status_code(), 400);
    }
}
