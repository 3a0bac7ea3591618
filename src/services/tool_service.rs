//! Tool master data, QR-tracked items, movements and consumable stock.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::{Tool, ToolItem, ToolMovement};
use crate::error::ApiError;
use crate::export::qr::qr_svg;
use crate::export::Attachment;
use crate::types::{Listing, Page, Role};
use crate::workflow::Actor;

use super::audit_service::{AuditEntry, AuditService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Warehouse,
    Site,
    Repair,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Warehouse => "warehouse",
            Location::Site => "site",
            Location::Repair => "repair",
        }
    }

    fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            "warehouse" => Ok(Location::Warehouse),
            "site" => Ok(Location::Site),
            "repair" => Ok(Location::Repair),
            other => Err(ApiError::bad_request(format!("Unknown location '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    InUse,
    Repair,
    Lost,
    Disposed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::InUse => "in_use",
            ItemStatus::Repair => "repair",
            ItemStatus::Lost => "lost",
            ItemStatus::Disposed => "disposed",
        }
    }

    /// Status implied by arriving at a location.
    pub fn at(location: Location) -> Self {
        match location {
            Location::Warehouse => ItemStatus::Available,
            Location::Site => ItemStatus::InUse,
            Location::Repair => ItemStatus::Repair,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveInput {
    pub to_location: Location,
    pub to_site_id: Option<Uuid>,
    pub note: Option<String>,
}

/// Validate a move and return the status the item ends up in.
pub fn plan_move(
    from: Location,
    from_site: Option<Uuid>,
    to: Location,
    to_site: Option<Uuid>,
) -> Result<ItemStatus, ApiError> {
    match (to, to_site) {
        (Location::Site, None) => return Err(ApiError::field("to_site_id", "A destination site is required")),
        (Location::Warehouse | Location::Repair, Some(_)) => {
            return Err(ApiError::field("to_site_id", "Only site moves take a destination site"))
        }
        _ => {}
    }
    if from == to && from_site == to_site {
        return Err(ApiError::bad_request(format!("Item is already at {}", to.as_str())));
    }
    Ok(ItemStatus::at(to))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolInput {
    pub name: String,
    pub model_number: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub is_consumable: bool,
    pub unit: Option<String>,
    #[serde(default)]
    pub stock_quantity: i32,
    #[serde(default)]
    pub min_stock: i32,
    pub warranty_expiration_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemInput {
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusInput {
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockInput {
    /// Positive to restock, negative to consume.
    pub delta: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolQuery {
    pub search: Option<String>,
    pub consumable: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemQuery {
    pub tool_id: Option<Uuid>,
    pub status: Option<ItemStatus>,
    pub location: Option<Location>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Item joined with its tool, as returned by a QR scan.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScannedItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: ToolItem,
    pub tool_name: String,
    pub site_name: Option<String>,
}

/// SQL predicate over a `tools t` row: consumables with a minimum set and
/// stock at or below it. Mirrors [`is_low_stock`].
pub(crate) const LOW_STOCK: &str = "t.min_stock > 0 AND t.stock_quantity <= t.min_stock";

pub fn is_low_stock(stock_quantity: i32, min_stock: i32) -> bool {
    min_stock > 0 && stock_quantity <= min_stock
}

pub struct ToolService {
    pool: PgPool,
}

impl ToolService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn require(actor: &Actor, min: Role, what: &str) -> Result<(), ApiError> {
        if actor.role.at_least(min) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("Only {} or above can {}", min, what)))
        }
    }

    pub async fn list_tools(&self, organization_id: Uuid, query: &ToolQuery) -> Result<Listing<Tool>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| format!("%{}%", s));

        let filter = r#"
            WHERE organization_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR name ILIKE $2 OR model_number ILIKE $2 OR manufacturer ILIKE $2)
              AND ($3::bool IS NULL OR is_consumable = $3)
        "#;
        let items: Vec<Tool> = sqlx::query_as(&format!(
            "SELECT * FROM tools {} ORDER BY name LIMIT $4 OFFSET $5",
            filter
        ))
        .bind(organization_id)
        .bind(&search)
        .bind(query.consumable)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM tools {}", filter))
            .bind(organization_id)
            .bind(&search)
            .bind(query.consumable)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn create_tool(&self, organization_id: Uuid, actor: &Actor, input: ToolInput) -> Result<Tool, ApiError> {
        Self::require(actor, Role::Leader, "register tools")?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        if input.stock_quantity < 0 || input.min_stock < 0 {
            return Err(ApiError::field("stock_quantity", "Stock cannot be negative"));
        }

        let tool: Tool = sqlx::query_as(
            r#"
            INSERT INTO tools (organization_id, name, model_number, manufacturer, category, is_consumable, unit,
                               stock_quantity, min_stock, warranty_expiration_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .bind(&input.model_number)
        .bind(&input.manufacturer)
        .bind(&input.category)
        .bind(input.is_consumable)
        .bind(&input.unit)
        .bind(input.stock_quantity)
        .bind(input.min_stock)
        .bind(input.warranty_expiration_date)
        .fetch_one(&self.pool)
        .await?;

        info!("Tool '{}' registered in org {}", tool.name, organization_id);
        AuditService::new(self.pool.clone())
            .record(AuditEntry::new(organization_id, actor.user_id, "create", "tool").entity(tool.id))
            .await;
        Ok(tool)
    }

    async fn fetch_tool(&self, organization_id: Uuid, tool_id: Uuid) -> Result<Tool, ApiError> {
        sqlx::query_as("SELECT * FROM tools WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL")
            .bind(tool_id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Tool not found"))
    }

    pub async fn list_items(&self, organization_id: Uuid, query: &ItemQuery) -> Result<Listing<ToolItem>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();

        let filter = r#"
            WHERE organization_id = $1 AND deleted_at IS NULL
              AND ($2::uuid IS NULL OR tool_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::text IS NULL OR current_location = $4)
        "#;
        let status = query.status.map(|s| s.as_str());
        let location = query.location.map(|l| l.as_str());
        let items: Vec<ToolItem> = sqlx::query_as(&format!(
            "SELECT * FROM tool_items {} ORDER BY created_at DESC LIMIT $5 OFFSET $6",
            filter
        ))
        .bind(organization_id)
        .bind(query.tool_id)
        .bind(status)
        .bind(location)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM tool_items {}", filter))
            .bind(organization_id)
            .bind(query.tool_id)
            .bind(status)
            .bind(location)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn create_item(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        tool_id: Uuid,
        input: ItemInput,
    ) -> Result<ToolItem, ApiError> {
        Self::require(actor, Role::Leader, "register tool items")?;
        let tool = self.fetch_tool(organization_id, tool_id).await?;
        if tool.is_consumable {
            return Err(ApiError::bad_request("Consumables are tracked by stock, not by item"));
        }

        let item: ToolItem = sqlx::query_as(
            r#"
            INSERT INTO tool_items (organization_id, tool_id, serial_number, qr_code)
            VALUES ($1, $2, $3, $4)
            RETURNING id, organization_id, tool_id, serial_number, qr_code, status, current_location,
                      current_site_id, created_at, updated_at
            "#,
        )
        .bind(organization_id)
        .bind(tool_id)
        .bind(&input.serial_number)
        .bind(Uuid::new_v4())
        .fetch_one(&self.pool)
        .await?;

        info!("Item {} of '{}' registered", item.id, tool.name);
        Ok(item)
    }

    async fn fetch_item(&self, organization_id: Uuid, item_id: Uuid) -> Result<ToolItem, ApiError> {
        sqlx::query_as(
            r#"
            SELECT id, organization_id, tool_id, serial_number, qr_code, status, current_location,
                   current_site_id, created_at, updated_at
            FROM tool_items WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(item_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Tool item not found"))
    }

    /// Look an item up by the UUID printed in its QR code.
    pub async fn scan(&self, organization_id: Uuid, qr_code: Uuid) -> Result<ScannedItem, ApiError> {
        sqlx::query_as(
            r#"
            SELECT i.id, i.organization_id, i.tool_id, i.serial_number, i.qr_code, i.status,
                   i.current_location, i.current_site_id, i.created_at, i.updated_at,
                   t.name AS tool_name, s.name AS site_name
            FROM tool_items i
            JOIN tools t ON t.id = i.tool_id
            LEFT JOIN sites s ON s.id = i.current_site_id
            WHERE i.qr_code = $1 AND i.organization_id = $2 AND i.deleted_at IS NULL
            "#,
        )
        .bind(qr_code)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("No tool item with this QR code"))
    }

    pub async fn item_qr(&self, organization_id: Uuid, item_id: Uuid) -> Result<Attachment, ApiError> {
        let item = self.fetch_item(organization_id, item_id).await?;
        let svg = qr_svg(&item.qr_code.to_string(), 256)?;
        Ok(Attachment::svg(format!("tool-item-{}.svg", item.id), svg))
    }

    /// Move an item and log the movement in one transaction. The update is
    /// guarded on the location that was read.
    pub async fn move_item(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        item_id: Uuid,
        input: MoveInput,
    ) -> Result<ToolItem, ApiError> {
        let item = self.fetch_item(organization_id, item_id).await?;
        if matches!(item.status.as_str(), "lost" | "disposed") {
            return Err(ApiError::bad_request(format!("A {} item cannot be moved", item.status)));
        }
        let from = Location::parse(&item.current_location)?;
        let status = plan_move(from, item.current_site_id, input.to_location, input.to_site_id)?;

        if let Some(site_id) = input.to_site_id {
            let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM sites WHERE id = $1 AND organization_id = $2")
                .bind(site_id)
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await?;
            if found.is_none() {
                return Err(ApiError::not_found("Site not found"));
            }
        }

        let mut tx = self.pool.begin().await?;
        let moved: ToolItem = sqlx::query_as(
            r#"
            UPDATE tool_items
            SET current_location = $3, current_site_id = $4, status = $5, updated_at = now()
            WHERE id = $1 AND organization_id = $2
              AND current_location = $6 AND current_site_id IS NOT DISTINCT FROM $7
              AND status NOT IN ('lost', 'disposed')
            RETURNING id, organization_id, tool_id, serial_number, qr_code, status, current_location,
                      current_site_id, created_at, updated_at
            "#,
        )
        .bind(item_id)
        .bind(organization_id)
        .bind(input.to_location.as_str())
        .bind(input.to_site_id)
        .bind(status.as_str())
        .bind(from.as_str())
        .bind(item.current_site_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::conflict("Item was moved by another request; rescan and try again"))?;

        sqlx::query(
            r#"
            INSERT INTO tool_movements (organization_id, tool_item_id, from_location, to_location, from_site_id, to_site_id, moved_by, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(organization_id)
        .bind(item_id)
        .bind(from.as_str())
        .bind(input.to_location.as_str())
        .bind(item.current_site_id)
        .bind(input.to_site_id)
        .bind(actor.user_id)
        .bind(&input.note)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            "Tool item {} moved {} -> {} by {}",
            item_id,
            from.as_str(),
            input.to_location.as_str(),
            actor.user_id
        );
        Ok(moved)
    }

    pub async fn movements(&self, organization_id: Uuid, item_id: Uuid) -> Result<Vec<ToolMovement>, ApiError> {
        self.fetch_item(organization_id, item_id).await?;
        let movements = sqlx::query_as(
            "SELECT * FROM tool_movements WHERE tool_item_id = $1 AND organization_id = $2 ORDER BY created_at DESC",
        )
        .bind(item_id)
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(movements)
    }

    pub async fn change_status(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        item_id: Uuid,
        input: StatusInput,
    ) -> Result<ToolItem, ApiError> {
        Self::require(actor, Role::Leader, "change tool status")?;
        let item = self.fetch_item(organization_id, item_id).await?;
        if item.status == ItemStatus::Disposed.as_str() {
            return Err(ApiError::bad_request("Disposed items cannot change status"));
        }

        let updated: ToolItem = sqlx::query_as(
            r#"
            UPDATE tool_items SET status = $3, updated_at = now()
            WHERE id = $1 AND organization_id = $2 AND status = $4
            RETURNING id, organization_id, tool_id, serial_number, qr_code, status, current_location,
                      current_site_id, created_at, updated_at
            "#,
        )
        .bind(item_id)
        .bind(organization_id)
        .bind(input.status.as_str())
        .bind(&item.status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::conflict("Item status changed concurrently"))?;

        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor.user_id, "change_status", "tool_item")
                    .entity(item_id)
                    .change(Some(json!({ "status": item.status })), Some(json!({ "status": input.status }))),
            )
            .await;
        Ok(updated)
    }

    /// Restock or consume a consumable. Stock never goes below zero.
    pub async fn adjust_stock(
        &self,
        organization_id: Uuid,
        actor: &Actor,
        tool_id: Uuid,
        input: StockInput,
    ) -> Result<Tool, ApiError> {
        if input.delta == 0 {
            return Err(ApiError::field("delta", "Delta must not be zero"));
        }
        let tool = self.fetch_tool(organization_id, tool_id).await?;
        if !tool.is_consumable {
            return Err(ApiError::bad_request("Only consumables have stock"));
        }

        let updated: Tool = sqlx::query_as(
            r#"
            UPDATE tools SET stock_quantity = stock_quantity + $3, updated_at = now()
            WHERE id = $1 AND organization_id = $2 AND is_consumable AND stock_quantity + $3 >= 0
            RETURNING *
            "#,
        )
        .bind(tool_id)
        .bind(organization_id)
        .bind(input.delta)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("Not enough stock of '{}'", tool.name)))?;

        info!(
            "Stock of '{}' adjusted by {} to {} by {}",
            updated.name, input.delta, updated.stock_quantity, actor.user_id
        );
        if is_low_stock(updated.stock_quantity, updated.min_stock) {
            warn!("'{}' is at {} (minimum {})", updated.name, updated.stock_quantity, updated.min_stock);
        }
        Ok(updated)
    }

    pub async fn low_stock(&self, organization_id: Uuid) -> Result<Vec<Tool>, ApiError> {
        let tools = sqlx::query_as(&format!(
            r#"
            SELECT t.* FROM tools t
            WHERE t.organization_id = $1 AND t.deleted_at IS NULL AND t.is_consumable AND {}
            ORDER BY t.name
            "#,
            LOW_STOCK
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_at_minimum_counts_as_low() {
        assert!(is_low_stock(5, 5));
        assert!(is_low_stock(0, 1));
        assert!(!is_low_stock(6, 5));
        assert!(!is_low_stock(0, 0));
    }

    #[test]
    fn moving_to_site_requires_site() {
        let err = plan_move(Location::Warehouse, None, Location::Site, None).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            plan_move(Location::Warehouse, None, Location::Site, Some(Uuid::new_v4())).unwrap(),
            ItemStatus::InUse
        );
    }

    #[test]
    fn arrival_sets_status() {
        let site = Some(Uuid::new_v4());
        assert_eq!(plan_move(Location::Site, site, Location::Repair, None).unwrap(), ItemStatus::Repair);
        assert_eq!(plan_move(Location::Repair, None, Location::Warehouse, None).unwrap(), ItemStatus::Available);
    }

    #[test]
    fn site_to_other_site_is_a_move() {
        let a = Some(Uuid::new_v4());
        let b = Some(Uuid::new_v4());
        assert!(plan_move(Location::Site, a, Location::Site, b).is_ok());
        assert!(plan_move(Location::Site, a, Location::Site, a).is_err());
    }

    #[test]
    fn warehouse_moves_reject_site() {
        assert!(plan_move(Location::Site, Some(Uuid::new_v4()), Location::Warehouse, Some(Uuid::new_v4())).is_err());
        assert!(plan_move(Location::Warehouse, None, Location::Warehouse, None).is_err());
    }
}
