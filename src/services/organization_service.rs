//! Tenant organizations, managed from the back office.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::database::models::{Organization, User};
use crate::error::ApiError;
use crate::types::{Listing, Page, Role};

use super::admin_service::{AdminLog, AdminService};

#[derive(Debug, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub subdomain: String,
    #[serde(default = "default_plan")]
    pub plan: String,
    #[serde(default = "default_max_users")]
    pub max_users: i32,
    pub billing_email: Option<String>,
    pub admin_email: String,
    pub admin_name: String,
    pub admin_password: String,
}

fn default_plan() -> String {
    "basic".to_string()
}

fn default_max_users() -> i32 {
    10
}

#[derive(Debug, Default, Deserialize)]
pub struct OrganizationQuery {
    pub search: Option<String>,
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct OrganizationSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub organization: Organization,
    pub active_users: i64,
}

#[derive(Debug, Serialize)]
pub struct CreatedOrganization {
    pub organization: Organization,
    pub admin: User,
}

/// Subdomains are lowercase letters, digits and inner hyphens.
pub fn valid_subdomain(subdomain: &str) -> bool {
    let bytes = subdomain.as_bytes();
    (3..=63).contains(&bytes.len())
        && bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first() != Some(&b'-')
        && bytes.last() != Some(&b'-')
}

pub struct OrganizationService {
    pool: PgPool,
}

impl OrganizationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, query: &OrganizationQuery) -> Result<Listing<OrganizationSummary>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| format!("%{}%", s));

        let filter = r#"
            WHERE o.deleted_at IS NULL
              AND ($1::text IS NULL OR o.name ILIKE $1 OR o.subdomain ILIKE $1)
              AND ($2::bool IS NULL OR o.is_active = $2)
        "#;
        let items: Vec<OrganizationSummary> = sqlx::query_as(&format!(
            r#"
            SELECT o.*,
                   (SELECT COUNT(*) FROM users u
                    WHERE u.organization_id = o.id AND u.is_active AND u.deleted_at IS NULL) AS active_users
            FROM organizations o {}
            ORDER BY o.created_at DESC LIMIT $3 OFFSET $4
            "#,
            filter
        ))
        .bind(&search)
        .bind(query.active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM organizations o {}", filter))
            .bind(&search)
            .bind(query.active)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<OrganizationSummary, ApiError> {
        sqlx::query_as(
            r#"
            SELECT o.*,
                   (SELECT COUNT(*) FROM users u
                    WHERE u.organization_id = o.id AND u.is_active AND u.deleted_at IS NULL) AS active_users
            FROM organizations o
            WHERE o.id = $1 AND o.deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization not found"))
    }

    /// Create the tenant and its first admin user together.
    pub async fn create(
        &self,
        super_admin_id: Uuid,
        input: NewOrganization,
        meta: AdminLog<'_>,
    ) -> Result<CreatedOrganization, ApiError> {
        let subdomain = input.subdomain.trim().to_lowercase();
        if input.name.trim().is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        if !valid_subdomain(&subdomain) {
            return Err(ApiError::field("subdomain", "Use 3-63 lowercase letters, digits or hyphens"));
        }
        if input.max_users < 1 {
            return Err(ApiError::field("max_users", "At least one user is required"));
        }
        if input.admin_password.chars().count() < 8 {
            return Err(ApiError::field("admin_password", "Password must be at least 8 characters"));
        }
        let password_hash = hash_password(&input.admin_password)?;

        let mut tx = self.pool.begin().await?;
        let organization: Organization = sqlx::query_as(
            r#"
            INSERT INTO organizations (name, subdomain, plan, max_users, billing_email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(input.name.trim())
        .bind(&subdomain)
        .bind(&input.plan)
        .bind(input.max_users)
        .bind(&input.billing_email)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::field("subdomain", "Subdomain is already taken")
            }
            other => other.into(),
        })?;

        let admin: User = sqlx::query_as(
            r#"
            INSERT INTO users (organization_id, email, name, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(organization.id)
        .bind(input.admin_email.trim().to_lowercase())
        .bind(input.admin_name.trim())
        .bind(&password_hash)
        .bind(Role::Admin.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::field("admin_email", "Email is already registered")
            }
            other => other.into(),
        })?;
        tx.commit().await?;

        info!("Organization {} ({}) created", organization.id, organization.subdomain);
        AdminService::new(self.pool.clone())
            .log(
                Some(super_admin_id),
                "organization_created",
                json!({ "organization_id": organization.id, "subdomain": organization.subdomain }),
                meta,
            )
            .await;
        Ok(CreatedOrganization { organization, admin })
    }

    pub async fn set_active(
        &self,
        super_admin_id: Uuid,
        id: Uuid,
        active: bool,
        meta: AdminLog<'_>,
    ) -> Result<Organization, ApiError> {
        let organization: Organization = sqlx::query_as(
            r#"
            UPDATE organizations SET is_active = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization not found"))?;

        let action = if active { "organization_activated" } else { "organization_deactivated" };
        info!("Organization {} {}", id, if active { "activated" } else { "deactivated" });
        AdminService::new(self.pool.clone())
            .log(Some(super_admin_id), action, json!({ "organization_id": id }), meta)
            .await;
        Ok(organization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_rules() {
        assert!(valid_subdomain("tanaka-kensetsu"));
        assert!(valid_subdomain("abc123"));
        assert!(!valid_subdomain("ab"));
        assert!(!valid_subdomain("-tanaka"));
        assert!(!valid_subdomain("Tanaka"));
        assert!(!valid_subdomain("tanaka_kensetsu"));
    }
}
