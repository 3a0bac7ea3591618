use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    /// Business date in the organization's local time.
    pub date: NaiveDate,
    pub clock_in_time: DateTime<Utc>,
    pub clock_out_time: Option<DateTime<Utc>>,
    pub clock_in_method: String,
    pub clock_out_method: Option<String>,
    pub clock_in_location_type: String,
    pub clock_out_location_type: Option<String>,
    pub site_id: Option<Uuid>,
    pub clock_out_site_id: Option<Uuid>,
    pub break_minutes: i32,
    pub worked_minutes: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
