//! Heavy equipment and the inspection / insurance dates it is kept legal by.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::models::Equipment;
use crate::error::ApiError;
use crate::types::{Listing, Page};

use super::audit_service::{AuditEntry, AuditService};

const DEFAULT_REMINDER_DAYS: i32 = 60;

/// Days from `today` until `deadline`, negative once it has passed.
pub fn days_until(deadline: NaiveDate, today: NaiveDate) -> i64 {
    (deadline - today).num_days()
}

/// How close a dated obligation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Expiry {
    /// On or past the date.
    Expired { days_overdue: i64 },
    /// Within the reminder window.
    DueSoon { days_left: i64 },
}

impl Expiry {
    /// `None` while the date is further away than `reminder_days`.
    pub fn check(deadline: NaiveDate, reminder_days: i64, today: NaiveDate) -> Option<Expiry> {
        let days = days_until(deadline, today);
        if days <= 0 {
            Some(Expiry::Expired { days_overdue: -days })
        } else if days <= reminder_days {
            Some(Expiry::DueSoon { days_left: days })
        } else {
            None
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Expiry::Expired { .. })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentInput {
    pub equipment_code: String,
    pub name: String,
    #[serde(default)]
    pub requires_vehicle_inspection: bool,
    pub vehicle_inspection_date: Option<NaiveDate>,
    pub inspection_reminder_days: Option<i32>,
    pub insurance_end_date: Option<NaiveDate>,
    pub insurance_reminder_days: Option<i32>,
    pub notes: Option<String>,
}

impl EquipmentInput {
    pub fn normalize(mut self) -> Result<Self, ApiError> {
        self.equipment_code = self.equipment_code.trim().to_string();
        self.name = self.name.trim().to_string();
        if self.equipment_code.is_empty() {
            return Err(ApiError::field("equipment_code", "Equipment code is required"));
        }
        if self.name.is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        for (field, days) in [
            ("inspection_reminder_days", &mut self.inspection_reminder_days),
            ("insurance_reminder_days", &mut self.insurance_reminder_days),
        ] {
            let value = days.unwrap_or(DEFAULT_REMINDER_DAYS);
            if !(0..=365).contains(&value) {
                return Err(ApiError::field(field, "Reminder days must be between 0 and 365"));
            }
            *days = Some(value);
        }
        self.notes = self.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EquipmentQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn code_in_use(code: &str) -> ApiError {
    ApiError::field("equipment_code", format!("Equipment code '{}' is already in use", code))
}

pub struct EquipmentService {
    pool: PgPool,
}

impl EquipmentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, organization_id: Uuid, query: &EquipmentQuery) -> Result<Listing<Equipment>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| format!("%{}%", s));

        let filter = r#"
            WHERE organization_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR name ILIKE $2 OR equipment_code ILIKE $2)
        "#;
        let items: Vec<Equipment> = sqlx::query_as(&format!(
            "SELECT * FROM heavy_equipment {} ORDER BY equipment_code LIMIT $3 OFFSET $4",
            filter
        ))
        .bind(organization_id)
        .bind(&search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM heavy_equipment {}", filter))
            .bind(organization_id)
            .bind(&search)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, organization_id: Uuid, id: Uuid) -> Result<Equipment, ApiError> {
        sqlx::query_as("SELECT * FROM heavy_equipment WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Equipment not found"))
    }

    pub async fn create(&self, organization_id: Uuid, user_id: Uuid, input: EquipmentInput) -> Result<Equipment, ApiError> {
        let input = input.normalize()?;
        let equipment: Equipment = sqlx::query_as(
            r#"
            INSERT INTO heavy_equipment (organization_id, equipment_code, name, requires_vehicle_inspection,
                                         vehicle_inspection_date, inspection_reminder_days, insurance_end_date,
                                         insurance_reminder_days, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(&input.equipment_code)
        .bind(&input.name)
        .bind(input.requires_vehicle_inspection)
        .bind(input.vehicle_inspection_date)
        .bind(input.inspection_reminder_days)
        .bind(input.insurance_end_date)
        .bind(input.insurance_reminder_days)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => code_in_use(&input.equipment_code),
            other => other.into(),
        })?;

        info!("Equipment {} registered in org {}", equipment.equipment_code, organization_id);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "create", "equipment")
                    .entity(equipment.id)
                    .change(None, Some(json!({ "equipment_code": equipment.equipment_code, "name": equipment.name }))),
            )
            .await;
        Ok(equipment)
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        id: Uuid,
        input: EquipmentInput,
    ) -> Result<Equipment, ApiError> {
        let input = input.normalize()?;
        let before = self.fetch(organization_id, id).await?;
        let equipment: Equipment = sqlx::query_as(
            r#"
            UPDATE heavy_equipment SET equipment_code = $3, name = $4, requires_vehicle_inspection = $5,
                vehicle_inspection_date = $6, inspection_reminder_days = $7, insurance_end_date = $8,
                insurance_reminder_days = $9, notes = $10, updated_at = now()
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(&input.equipment_code)
        .bind(&input.name)
        .bind(input.requires_vehicle_inspection)
        .bind(input.vehicle_inspection_date)
        .bind(input.inspection_reminder_days)
        .bind(input.insurance_end_date)
        .bind(input.insurance_reminder_days)
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => code_in_use(&input.equipment_code),
            other => other.into(),
        })?
        .ok_or_else(|| ApiError::not_found("Equipment not found"))?;

        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "update", "equipment")
                    .entity(id)
                    .change(
                        Some(json!({
                            "vehicle_inspection_date": before.vehicle_inspection_date,
                            "insurance_end_date": before.insurance_end_date,
                        })),
                        Some(json!({
                            "vehicle_inspection_date": equipment.vehicle_inspection_date,
                            "insurance_end_date": equipment.insurance_end_date,
                        })),
                    ),
            )
            .await;
        Ok(equipment)
    }

    pub async fn delete(&self, organization_id: Uuid, user_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        let done = sqlx::query(
            "UPDATE heavy_equipment SET deleted_at = now(), updated_at = now() WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(ApiError::not_found("Equipment not found"));
        }
        AuditService::new(self.pool.clone())
            .record(AuditEntry::new(organization_id, user_id, "delete", "equipment").entity(id))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn expiry_depends_on_the_reminder_window() {
        let today = date(2024, 6, 1);
        assert_eq!(Expiry::check(date(2024, 7, 31), 60, today), Some(Expiry::DueSoon { days_left: 60 }));
        assert_eq!(Expiry::check(date(2024, 8, 1), 60, today), None);
        assert_eq!(Expiry::check(date(2024, 6, 1), 60, today), Some(Expiry::Expired { days_overdue: 0 }));
        assert_eq!(Expiry::check(date(2024, 5, 20), 0, today), Some(Expiry::Expired { days_overdue: 12 }));
        assert!(Expiry::check(date(2024, 5, 31), 30, today).unwrap().is_expired());
    }

    #[test]
    fn reminder_days_default_and_are_bounded() {
        let input = EquipmentInput {
            equipment_code: "EX-01".to_string(),
            name: "Excavator".to_string(),
            requires_vehicle_inspection: true,
            vehicle_inspection_date: Some(date(2025, 3, 1)),
            inspection_reminder_days: None,
            insurance_end_date: None,
            insurance_reminder_days: Some(30),
            notes: Some("  ".to_string()),
        };
        let normalized = input.clone().normalize().unwrap();
        assert_eq!(normalized.inspection_reminder_days, Some(60));
        assert_eq!(normalized.insurance_reminder_days, Some(30));
        assert_eq!(normalized.notes, None);

        let err = EquipmentInput {
            insurance_reminder_days: Some(400),
            ..input
        }
        .normalize()
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
