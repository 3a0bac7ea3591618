use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::AuditLog;
use crate::database::DatabaseError;
use crate::types::{Listing, Page};

/// One row for `audit_logs`.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: Option<Uuid>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
}

impl<'a> AuditEntry<'a> {
    pub fn new(organization_id: Uuid, user_id: Uuid, action: &'a str, entity_type: &'a str) -> Self {
        Self {
            organization_id,
            user_id: Some(user_id),
            action,
            entity_type,
            entity_id: None,
            old_values: None,
            new_values: None,
        }
    }

    pub fn entity(mut self, id: Uuid) -> Self {
        self.entity_id = Some(id);
        self
    }

    pub fn change(mut self, old_values: Option<Value>, new_values: Option<Value>) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub user_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Best effort: a failed audit write is logged and never fails the request.
    pub async fn record(&self, entry: AuditEntry<'_>) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (organization_id, user_id, action, entity_type, entity_id, old_values, new_values)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.organization_id)
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                "Failed to write audit log {} {} for org {}: {}",
                entry.action,
                entry.entity_type,
                entry.organization_id,
                e
            );
        }
    }

    pub async fn list(&self, organization_id: Uuid, query: &AuditQuery) -> Result<Listing<AuditLog>, DatabaseError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();

        let filter = r#"
            WHERE organization_id = $1
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::uuid IS NULL OR user_id = $3)
              AND ($4::date IS NULL OR created_at >= $4::date)
              AND ($5::date IS NULL OR created_at < $5::date + 1)
        "#;

        let items: Vec<AuditLog> = sqlx::query_as(&format!(
            "SELECT * FROM audit_logs {} ORDER BY created_at DESC LIMIT $6 OFFSET $7",
            filter
        ))
        .bind(organization_id)
        .bind(&query.entity_type)
        .bind(query.user_id)
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM audit_logs {}", filter))
            .bind(organization_id)
            .bind(&query.entity_type)
            .bind(query.user_id)
            .bind(query.from)
            .bind(query.to)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }
}
