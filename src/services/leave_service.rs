//! Days off. Entries are recorded as approved; managers may change the
//! status afterwards.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::models::LeaveRecord;
use crate::error::ApiError;
use crate::types::{Listing, Page, Role};
use crate::workflow::Actor;

use super::audit_service::{AuditEntry, AuditService};

const LEAVE_TYPES: [&str; 4] = ["paid", "sick", "personal", "other"];
const STATUSES: [&str; 3] = ["pending", "approved", "rejected"];

#[derive(Debug, Clone, Deserialize)]
pub struct NewLeave {
    /// Managers may record leave for someone else.
    pub user_id: Option<Uuid>,
    pub leave_date: NaiveDate,
    pub leave_type: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaveUpdate {
    pub leave_date: Option<NaiveDate>,
    pub leave_type: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Managers only.
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaveQuery {
    pub status: Option<String>,
    pub user_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn check_leave_type(leave_type: &str) -> Result<(), ApiError> {
    if LEAVE_TYPES.contains(&leave_type) {
        Ok(())
    } else {
        Err(ApiError::field("leave_type", format!("Must be one of {}", LEAVE_TYPES.join(", "))))
    }
}

fn sees_everyone(actor: &Actor) -> bool {
    actor.role.at_least(Role::Manager)
}

/// Whose leave a new entry records.
pub fn leave_owner(actor: &Actor, requested: Option<Uuid>) -> Uuid {
    match requested {
        Some(user_id) if sees_everyone(actor) => user_id,
        _ => actor.user_id,
    }
}

/// Owners may edit their own entries; managers may edit anyone's and
/// are the only ones who can change the status.
pub fn check_update(actor: &Actor, owner: Uuid, update: &LeaveUpdate) -> Result<(), ApiError> {
    ensure_owner_or_manager(actor, owner)?;
    if let Some(leave_type) = &update.leave_type {
        check_leave_type(leave_type)?;
    }
    if let Some(status) = &update.status {
        if !sees_everyone(actor) {
            return Err(ApiError::forbidden("Only managers may change the status of leave"));
        }
        if !STATUSES.contains(&status.as_str()) {
            return Err(ApiError::field("status", format!("Must be one of {}", STATUSES.join(", "))));
        }
    }
    Ok(())
}

fn ensure_owner_or_manager(actor: &Actor, owner: Uuid) -> Result<(), ApiError> {
    if actor.user_id == owner || sees_everyone(actor) {
        Ok(())
    } else {
        Err(ApiError::forbidden("You can only manage your own leave"))
    }
}

fn already_taken() -> ApiError {
    ApiError::field("leave_date", "Leave is already recorded for this date")
}

fn map_duplicate(e: sqlx::Error) -> ApiError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => already_taken(),
        other => other.into(),
    }
}

pub struct LeaveService {
    pool: PgPool,
}

impl LeaveService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    const SELECT: &'static str = r#"
        SELECT l.id, l.organization_id, l.user_id, u.name AS user_name, l.leave_date, l.leave_type, l.status,
               l.reason, l.notes, l.created_by, l.created_at, l.updated_at
        FROM leave_records l
        JOIN users u ON u.id = l.user_id
    "#;

    /// Staff and leaders only ever see their own entries.
    pub async fn list(&self, organization_id: Uuid, actor: &Actor, query: &LeaveQuery) -> Result<Listing<LeaveRecord>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let user_id = if sees_everyone(actor) {
            query.user_id
        } else {
            Some(actor.user_id)
        };

        let filter = r#"
            WHERE l.organization_id = $1
              AND ($2::uuid IS NULL OR l.user_id = $2)
              AND ($3::text IS NULL OR l.status = $3)
              AND ($4::date IS NULL OR l.leave_date >= $4)
              AND ($5::date IS NULL OR l.leave_date <= $5)
        "#;
        let items: Vec<LeaveRecord> = sqlx::query_as(&format!(
            "{} {} ORDER BY l.leave_date DESC, u.name LIMIT $6 OFFSET $7",
            Self::SELECT,
            filter
        ))
        .bind(organization_id)
        .bind(user_id)
        .bind(&query.status)
        .bind(query.start_date)
        .bind(query.end_date)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM leave_records l {}", filter))
            .bind(organization_id)
            .bind(user_id)
            .bind(&query.status)
            .bind(query.start_date)
            .bind(query.end_date)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, organization_id: Uuid, actor: &Actor, id: Uuid) -> Result<LeaveRecord, ApiError> {
        let record: LeaveRecord = sqlx::query_as(&format!(
            "{} WHERE l.id = $1 AND l.organization_id = $2",
            Self::SELECT
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Leave record not found"))?;
        ensure_owner_or_manager(actor, record.user_id)?;
        Ok(record)
    }

    pub async fn create(&self, organization_id: Uuid, actor: &Actor, input: NewLeave) -> Result<LeaveRecord, ApiError> {
        check_leave_type(&input.leave_type)?;
        let owner = leave_owner(actor, input.user_id);

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO leave_records (organization_id, user_id, leave_date, leave_type, status, reason, notes, created_by)
            SELECT $1, u.id, $3, $4, 'approved', $5, $6, $7
            FROM users u
            WHERE u.id = $2 AND u.organization_id = $1 AND u.deleted_at IS NULL
            RETURNING id
            "#,
        )
        .bind(organization_id)
        .bind(owner)
        .bind(input.leave_date)
        .bind(&input.leave_type)
        .bind(input.reason.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .bind(input.notes.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .bind(actor.user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_duplicate)?
        .ok_or_else(|| ApiError::field("user_id", "User not found"))?;

        info!("Leave {} on {} recorded for user {}", input.leave_type, input.leave_date, owner);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "create", "leave")
                    .entity(id)
                    .change(
                        None,
                        Some(json!({ "user_id": owner, "leave_date": input.leave_date, "leave_type": input.leave_type })),
                    ),
            )
            .await;
        self.fetch(organization_id, actor, id).await
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        id: Uuid,
        update: LeaveUpdate,
    ) -> Result<LeaveRecord, ApiError> {
        let before = self.fetch(organization_id, actor, id).await?;
        check_update(actor, before.user_id, &update)?;

        sqlx::query(
            r#"
            UPDATE leave_records SET
                leave_date = COALESCE($3, leave_date),
                leave_type = COALESCE($4, leave_type),
                reason = COALESCE($5, reason),
                notes = COALESCE($6, notes),
                status = COALESCE($7, status),
                updated_at = now()
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(update.leave_date)
        .bind(&update.leave_type)
        .bind(&update.reason)
        .bind(&update.notes)
        .bind(&update.status)
        .execute(&self.pool)
        .await
        .map_err(map_duplicate)?;

        let after = self.fetch(organization_id, actor, id).await?;
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "update", "leave")
                    .entity(id)
                    .change(
                        Some(json!({ "leave_date": before.leave_date, "leave_type": before.leave_type, "status": before.status })),
                        Some(json!({ "leave_date": after.leave_date, "leave_type": after.leave_type, "status": after.status })),
                    ),
            )
            .await;
        Ok(after)
    }

    pub async fn delete(&self, organization_id: Uuid, actor: &Actor, id: Uuid) -> Result<(), ApiError> {
        let record = self.fetch(organization_id, actor, id).await?;
        sqlx::query("DELETE FROM leave_records WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        info!("Leave {} of user {} deleted", id, record.user_id);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "delete", "leave")
                    .entity(id)
                    .change(Some(json!({ "user_id": record.user_id, "leave_date": record.leave_date })), None),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn only_managers_record_leave_for_others() {
        let colleague = Uuid::new_v4();
        let staff = actor(Role::Staff);
        assert_eq!(leave_owner(&staff, Some(colleague)), staff.user_id);
        assert_eq!(leave_owner(&staff, None), staff.user_id);

        let manager = actor(Role::Manager);
        assert_eq!(leave_owner(&manager, Some(colleague)), colleague);
        assert_eq!(leave_owner(&actor(Role::Admin), Some(colleague)), colleague);

        let leader = actor(Role::Leader);
        assert_eq!(leave_owner(&leader, Some(colleague)), leader.user_id);
    }

    #[test]
    fn owners_edit_but_only_managers_set_status() {
        let staff = actor(Role::Staff);
        let retype = LeaveUpdate {
            leave_type: Some("sick".to_string()),
            ..Default::default()
        };
        assert!(check_update(&staff, staff.user_id, &retype).is_ok());
        assert_eq!(check_update(&staff, Uuid::new_v4(), &retype).unwrap_err().status_code(), 403);

        let approve = LeaveUpdate {
            status: Some("rejected".to_string()),
            ..Default::default()
        };
        assert_eq!(check_update(&staff, staff.user_id, &approve).unwrap_err().status_code(), 403);
        assert!(check_update(&actor(Role::Manager), staff.user_id, &approve).is_ok());
    }

    #[test]
    fn rejects_unknown_types_and_statuses() {
        let manager = actor(Role::Manager);
        let holiday = LeaveUpdate {
            leave_type: Some("holiday".to_string()),
            ..Default::default()
        };
        assert_eq!(check_update(&manager, manager.user_id, &holiday).unwrap_err().status_code(), 400);

        let cancelled = LeaveUpdate {
            status: Some("cancelled".to_string()),
            ..Default::default()
        };
        assert_eq!(check_update(&manager, manager.user_id, &cancelled).unwrap_err().status_code(), 400);
    }
}
