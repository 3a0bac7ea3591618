use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tool {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub model_number: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub is_consumable: bool,
    pub unit: Option<String>,
    pub stock_quantity: i32,
    pub min_stock: i32,
    pub warranty_expiration_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A physical unit of a tool, tracked by its QR code.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ToolItem {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub tool_id: Uuid,
    pub serial_number: Option<String>,
    pub qr_code: Uuid,
    pub status: String,
    pub current_location: String,
    pub current_site_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ToolMovement {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub tool_item_id: Uuid,
    pub from_location: String,
    pub to_location: String,
    pub from_site_id: Option<Uuid>,
    pub to_site_id: Option<Uuid>,
    pub moved_by: Uuid,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
