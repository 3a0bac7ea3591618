use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Heavy machinery with statutory inspection and insurance dates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Equipment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub equipment_code: String,
    pub name: String,
    pub requires_vehicle_inspection: bool,
    pub vehicle_inspection_date: Option<NaiveDate>,
    pub inspection_reminder_days: i32,
    pub insurance_end_date: Option<NaiveDate>,
    pub insurance_reminder_days: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
