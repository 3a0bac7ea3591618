//! Construction projects that documents are filed against.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::models::Project;
use crate::error::ApiError;
use crate::types::{Listing, Page};

use super::audit_service::{AuditEntry, AuditService};

const STATUSES: [&str; 4] = ["planning", "in_progress", "completed", "cancelled"];

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInput {
    pub project_code: String,
    pub project_name: String,
    pub client_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub contract_amount: Option<Decimal>,
    pub budget_amount: Option<Decimal>,
    pub status: Option<String>,
    pub project_manager_id: Option<Uuid>,
}

impl ProjectInput {
    pub fn normalize(mut self) -> Result<Self, ApiError> {
        self.project_code = self.project_code.trim().to_string();
        self.project_name = self.project_name.trim().to_string();
        if self.project_code.is_empty() {
            return Err(ApiError::field("project_code", "Project code is required"));
        }
        if self.project_name.is_empty() {
            return Err(ApiError::field("project_name", "Project name is required"));
        }

        let status = self.status.take().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let status = status.unwrap_or_else(|| "planning".to_string());
        if !STATUSES.contains(&status.as_str()) {
            return Err(ApiError::field("status", format!("Must be one of {}", STATUSES.join(", "))));
        }
        self.status = Some(status);

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(ApiError::field("end_date", "End date is before the start date"));
            }
        }
        for (field, amount) in [("contract_amount", self.contract_amount), ("budget_amount", self.budget_amount)] {
            if amount.is_some_and(|a| a.is_sign_negative()) {
                return Err(ApiError::field(field, "Amount cannot be negative"));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// ORDER BY for a listing. Unknown fields fall back to the start date,
/// anything but `asc` sorts descending.
pub fn order_clause(field: Option<&str>, order: Option<&str>) -> String {
    let column = match field {
        Some("end_date") => "end_date",
        Some("contract_amount") => "contract_amount",
        _ => "start_date",
    };
    let direction = if order == Some("asc") { "ASC" } else { "DESC" };
    format!("p.{} {} NULLS LAST, p.project_code", column, direction)
}

fn code_in_use(code: &str) -> ApiError {
    ApiError::field("project_code", format!("Project code '{}' is already in use", code))
}

pub struct ProjectService {
    pool: PgPool,
}

impl ProjectService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    const SELECT: &'static str = r#"
        SELECT p.id, p.organization_id, p.project_code, p.project_name, p.client_id, c.name AS client_name,
               p.site_id, p.start_date, p.end_date, p.contract_amount, p.budget_amount, p.status,
               p.project_manager_id, p.created_at, p.updated_at
        FROM projects p
        LEFT JOIN clients c ON c.id = p.client_id AND c.organization_id = p.organization_id
    "#;

    pub async fn list(&self, organization_id: Uuid, query: &ProjectQuery) -> Result<Listing<Project>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| format!("%{}%", s));
        let status = query.status.as_deref().filter(|s| !s.is_empty() && *s != "all");

        let filter = r#"
            WHERE p.organization_id = $1 AND p.deleted_at IS NULL
              AND ($2::text IS NULL OR p.project_name ILIKE $2 OR p.project_code ILIKE $2)
              AND ($3::text IS NULL OR p.status = $3)
        "#;
        let items: Vec<Project> = sqlx::query_as(&format!(
            "{} {} ORDER BY {} LIMIT $4 OFFSET $5",
            Self::SELECT,
            filter,
            order_clause(query.sort_field.as_deref(), query.sort_order.as_deref())
        ))
        .bind(organization_id)
        .bind(&search)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM projects p {}", filter))
            .bind(organization_id)
            .bind(&search)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, organization_id: Uuid, id: Uuid) -> Result<Project, ApiError> {
        sqlx::query_as(&format!(
            "{} WHERE p.id = $1 AND p.organization_id = $2 AND p.deleted_at IS NULL",
            Self::SELECT
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))
    }

    /// Client, site and manager must belong to the organization.
    async fn ensure_references(&self, organization_id: Uuid, input: &ProjectInput) -> Result<(), ApiError> {
        let checks = [
            ("clients", "client_id", "Client not found", input.client_id),
            ("sites", "site_id", "Site not found", input.site_id),
            ("users", "project_manager_id", "User not found", input.project_manager_id),
        ];
        for (table, field, missing, id) in checks {
            let Some(id) = id else { continue };
            let found: Option<(i32,)> = sqlx::query_as(&format!(
                "SELECT 1 FROM {} WHERE id = $1 AND organization_id = $2",
                table
            ))
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;
            if found.is_none() {
                return Err(ApiError::field(field, missing));
            }
        }
        Ok(())
    }

    pub async fn create(&self, organization_id: Uuid, user_id: Uuid, input: ProjectInput) -> Result<Project, ApiError> {
        let input = input.normalize()?;
        self.ensure_references(organization_id, &input).await?;

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO projects (organization_id, project_code, project_name, client_id, site_id, start_date,
                                  end_date, contract_amount, budget_amount, status, project_manager_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(organization_id)
        .bind(&input.project_code)
        .bind(&input.project_name)
        .bind(input.client_id)
        .bind(input.site_id)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.contract_amount)
        .bind(input.budget_amount)
        .bind(&input.status)
        .bind(input.project_manager_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => code_in_use(&input.project_code),
            other => other.into(),
        })?;

        info!("Project {} created in org {}", input.project_code, organization_id);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "create", "project")
                    .entity(id)
                    .change(
                        None,
                        Some(json!({
                            "project_code": input.project_code,
                            "project_name": input.project_name,
                            "status": input.status,
                            "contract_amount": input.contract_amount,
                        })),
                    ),
            )
            .await;
        self.fetch(organization_id, id).await
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        id: Uuid,
        input: ProjectInput,
    ) -> Result<Project, ApiError> {
        let input = input.normalize()?;
        let before = self.fetch(organization_id, id).await?;
        self.ensure_references(organization_id, &input).await?;

        sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE projects SET project_code = $3, project_name = $4, client_id = $5, site_id = $6,
                start_date = $7, end_date = $8, contract_amount = $9, budget_amount = $10, status = $11,
                project_manager_id = $12, updated_at = now()
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(&input.project_code)
        .bind(&input.project_name)
        .bind(input.client_id)
        .bind(input.site_id)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.contract_amount)
        .bind(input.budget_amount)
        .bind(&input.status)
        .bind(input.project_manager_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => code_in_use(&input.project_code),
            other => other.into(),
        })?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "update", "project")
                    .entity(id)
                    .change(
                        Some(json!({ "status": before.status, "contract_amount": before.contract_amount })),
                        Some(json!({ "status": input.status, "contract_amount": input.contract_amount })),
                    ),
            )
            .await;
        self.fetch(organization_id, id).await
    }

    /// Soft delete. Documents keep their reference.
    pub async fn delete(&self, organization_id: Uuid, user_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        let done = sqlx::query(
            "UPDATE projects SET deleted_at = now(), updated_at = now() WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(ApiError::not_found("Project not found"));
        }

        info!("Project {} deleted in org {}", id, organization_id);
        AuditService::new(self.pool.clone())
            .record(AuditEntry::new(organization_id, user_id, "delete", "project").entity(id))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> ProjectInput {
        ProjectInput {
            project_code: " P-2024-01 ".to_string(),
            project_name: "Riverside warehouse".to_string(),
            client_id: None,
            site_id: None,
            start_date: NaiveDate::from_ymd_opt(2024, 4, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 9, 30),
            contract_amount: Some(Decimal::from(12_000_000)),
            budget_amount: None,
            status: None,
            project_manager_id: None,
        }
    }

    #[test]
    fn new_projects_start_in_planning() {
        let project = input().normalize().unwrap();
        assert_eq!(project.project_code, "P-2024-01");
        assert_eq!(project.status.as_deref(), Some("planning"));
    }

    #[test]
    fn rejects_unknown_status_and_inverted_dates() {
        let err = ProjectInput {
            status: Some("paused".to_string()),
            ..input()
        }
        .normalize()
        .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = ProjectInput {
            end_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..input()
        }
        .normalize()
        .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = ProjectInput {
            project_name: "  ".to_string(),
            ..input()
        }
        .normalize()
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn listing_sorts_only_by_known_columns() {
        assert_eq!(order_clause(None, None), "p.start_date DESC NULLS LAST, p.project_code");
        assert_eq!(
            order_clause(Some("contract_amount"), Some("asc")),
            "p.contract_amount ASC NULLS LAST, p.project_code"
        );
        assert_eq!(
            order_clause(Some("name; DROP TABLE projects"), Some("sideways")),
            "p.start_date DESC NULLS LAST, p.project_code"
        );
    }
}
