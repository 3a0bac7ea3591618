use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One day of leave for one user. `user_name` is joined in on reads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaveRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub leave_date: NaiveDate,
    pub leave_type: String,
    pub status: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
