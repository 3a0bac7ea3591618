use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Back-office operator. Not a tenant user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SuperAdmin {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub two_factor_enabled: bool,
    #[serde(skip_serializing)]
    pub two_factor_secret: Option<String>,
    /// Last TOTP time step accepted for this account.
    #[serde(skip_serializing)]
    pub two_factor_last_step: Option<i64>,
    #[serde(skip_serializing)]
    pub backup_codes: Vec<String>,
    #[serde(skip_serializing)]
    pub used_backup_codes: Vec<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SuperAdminLog {
    pub id: Uuid,
    pub super_admin_id: Option<Uuid>,
    pub action: String,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SalesLead {
    pub id: Uuid,
    pub company_name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub source: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub assigned_to: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SalesActivity {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub super_admin_id: Uuid,
    pub activity_type: String,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
