use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::Notification;
use crate::database::DatabaseError;
use crate::types::{Listing, Page};

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: &'static str,
    pub title: String,
    pub message: String,
    pub related_kind: Option<&'static str>,
    pub related_id: Option<Uuid>,
}

impl NewNotification {
    pub fn new(kind: &'static str, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            related_kind: None,
            related_id: None,
        }
    }

    pub fn related(mut self, kind: &'static str, id: Uuid) -> Self {
        self.related_kind = Some(kind);
        self.related_id = Some(id);
        self
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub struct NotificationService {
    pool: PgPool,
}

impl NotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Notify specific users. Failures are logged, not returned.
    pub async fn notify_users(&self, organization_id: Uuid, user_ids: &[Uuid], notification: &NewNotification) {
        if user_ids.is_empty() {
            return;
        }
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (organization_id, user_id, kind, title, message, related_kind, related_id)
            SELECT $1, u.id, $3, $4, $5, $6, $7
            FROM users u
            WHERE u.id = ANY($2) AND u.organization_id = $1 AND u.deleted_at IS NULL
            "#,
        )
        .bind(organization_id)
        .bind(user_ids)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.related_kind)
        .bind(notification.related_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to notify users in org {}: {}", organization_id, e);
        }
    }

    /// Notify every active user of the organization holding one of `roles`,
    /// except `exclude`.
    pub async fn notify_roles(
        &self,
        organization_id: Uuid,
        roles: &[&str],
        exclude: Option<Uuid>,
        notification: &NewNotification,
    ) -> u64 {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (organization_id, user_id, kind, title, message, related_kind, related_id)
            SELECT $1, u.id, $4, $5, $6, $7, $8
            FROM users u
            WHERE u.organization_id = $1
              AND u.role = ANY($2)
              AND u.is_active AND u.deleted_at IS NULL
              AND ($3::uuid IS NULL OR u.id <> $3)
            "#,
        )
        .bind(organization_id)
        .bind(roles)
        .bind(exclude)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.related_kind)
        .bind(notification.related_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => done.rows_affected(),
            Err(e) => {
                tracing::error!("Failed to notify {:?} in org {}: {}", roles, organization_id, e);
                0
            }
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid, query: &NotificationQuery) -> Result<Listing<Notification>, DatabaseError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();

        let items: Vec<Notification> = sqlx::query_as(
            r#"
            SELECT * FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR NOT is_read)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(query.unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT is_read)",
        )
        .bind(user_id)
        .bind(query.unread_only)
        .fetch_one(&self.pool)
        .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<Notification, DatabaseError> {
        sqlx::query_as(
            r#"
            UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, now())
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound("Notification not found".to_string()))
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, DatabaseError> {
        let done = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = now() WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}
