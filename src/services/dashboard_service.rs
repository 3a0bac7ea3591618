//! Home-screen figures. Each role sees the panels relevant to its work.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::types::{business_today, Role};

use super::equipment_service::Expiry;
use super::tool_service::LOW_STOCK;

/// Alerts look this far ahead.
const ALERT_HORIZON_DAYS: i64 = 30;
/// Users who logged in within this many days count as active.
const ACTIVE_USER_DAYS: i64 = 30;

/// Panels shown for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Panels {
    pub own_attendance: bool,
    pub team_attendance: bool,
    pub inventory: bool,
    pub purchase_orders: bool,
    pub organization: bool,
}

impl Panels {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Staff => Panels {
                own_attendance: true,
                ..Default::default()
            },
            Role::Leader => Panels {
                team_attendance: true,
                ..Default::default()
            },
            Role::Manager => Panels {
                inventory: true,
                purchase_orders: true,
                ..Default::default()
            },
            Role::Admin => Panels {
                organization: true,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OwnAttendance {
    pub clocked_in: bool,
    pub clocked_out: bool,
    /// Minutes since clock-in while still at work.
    pub worked_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamAttendance {
    pub present: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inventory {
    pub low_stock: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingOrders {
    pub pending: i64,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationStats {
    pub active_users: i64,
    pub total_users: i64,
    pub monthly_purchase_cost: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<OwnAttendance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_attendance: Option<TeamAttendance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Inventory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_orders: Option<PendingOrders>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<OrganizationStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: &'static str,
    pub severity: Severity,
    pub title: String,
    pub related_id: Uuid,
}

/// Out of stock is critical; merely low is a warning.
pub fn stock_severity(stock_quantity: i32) -> Severity {
    if stock_quantity <= 0 {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

fn expiry_severity(expiry: Expiry) -> Severity {
    if expiry.is_expired() {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// First day of `today`'s month and of the month after.
pub fn month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today.with_day(1).unwrap_or(today);
    let next = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    };
    (start, next.unwrap_or(start))
}

#[derive(FromRow)]
struct DatedRow {
    id: Uuid,
    name: String,
    date: NaiveDate,
}

pub struct DashboardService {
    pool: PgPool,
}

impl DashboardService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn stats(&self, organization_id: Uuid, user_id: Uuid, role: Role) -> Result<DashboardStats, ApiError> {
        let panels = Panels::for_role(role);
        let today = business_today();
        let mut stats = DashboardStats::default();

        if panels.own_attendance {
            let own: Option<OwnAttendance> = sqlx::query_as(
                r#"
                SELECT TRUE AS clocked_in, clock_out_time IS NOT NULL AS clocked_out,
                       COALESCE(worked_minutes,
                                (EXTRACT(EPOCH FROM (COALESCE(clock_out_time, now()) - clock_in_time)) / 60)::int
                       )::bigint AS worked_minutes
                FROM attendance_records WHERE user_id = $1 AND date = $2
                "#,
            )
            .bind(user_id)
            .bind(today)
            .fetch_optional(&self.pool)
            .await?;
            stats.attendance = Some(own.unwrap_or(OwnAttendance {
                clocked_in: false,
                clocked_out: false,
                worked_minutes: 0,
            }));
        }

        if panels.team_attendance {
            let (present, total): (i64, i64) = sqlx::query_as(
                r#"
                SELECT COUNT(a.id), COUNT(u.id)
                FROM users u
                LEFT JOIN attendance_records a ON a.user_id = u.id AND a.date = $2
                WHERE u.organization_id = $1 AND u.role IN ('staff', 'leader')
                  AND u.is_active AND u.deleted_at IS NULL
                "#,
            )
            .bind(organization_id)
            .bind(today)
            .fetch_one(&self.pool)
            .await?;
            stats.team_attendance = Some(TeamAttendance { present, total });
        }

        if panels.inventory {
            let (low_stock,): (i64,) = sqlx::query_as(&format!(
                "SELECT COUNT(*) FROM tools t WHERE t.organization_id = $1 AND t.deleted_at IS NULL AND t.is_consumable AND {}",
                LOW_STOCK
            ))
            .bind(organization_id)
            .fetch_one(&self.pool)
            .await?;
            stats.inventory = Some(Inventory { low_stock });
        }

        if panels.purchase_orders {
            let (pending, total_amount): (i64, Decimal) = sqlx::query_as(
                r#"
                SELECT COUNT(*), COALESCE(SUM(total_amount), 0)
                FROM purchase_orders
                WHERE organization_id = $1 AND status = 'submitted' AND deleted_at IS NULL
                "#,
            )
            .bind(organization_id)
            .fetch_one(&self.pool)
            .await?;
            stats.purchase_orders = Some(PendingOrders { pending, total_amount });
        }

        if panels.organization {
            let (active_users, total_users): (i64, i64) = sqlx::query_as(
                r#"
                SELECT COUNT(*) FILTER (WHERE last_login_at > $2), COUNT(*)
                FROM users WHERE organization_id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(organization_id)
            .bind(Utc::now() - Duration::days(ACTIVE_USER_DAYS))
            .fetch_one(&self.pool)
            .await?;
            let (start, end) = month_bounds(today);
            let (monthly_purchase_cost,): (Decimal,) = sqlx::query_as(
                r#"
                SELECT COALESCE(SUM(total_amount), 0) FROM purchase_orders
                WHERE organization_id = $1 AND deleted_at IS NULL AND order_date >= $2 AND order_date < $3
                "#,
            )
            .bind(organization_id)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?;
            stats.organization = Some(OrganizationStats {
                active_users,
                total_users,
                monthly_purchase_cost,
            });
        }

        Ok(stats)
    }

    /// Low stock, equipment deadlines and tool warranties, most urgent first.
    pub async fn alerts(&self, organization_id: Uuid) -> Result<Vec<Alert>, ApiError> {
        let today = business_today();
        let mut alerts = Vec::new();

        let low: Vec<(Uuid, String, i32)> = sqlx::query_as(&format!(
            r#"
            SELECT t.id, t.name, t.stock_quantity FROM tools t
            WHERE t.organization_id = $1 AND t.deleted_at IS NULL AND t.is_consumable AND {}
            ORDER BY t.stock_quantity, t.name
            "#,
            LOW_STOCK
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        for (id, name, stock_quantity) in low {
            alerts.push(Alert {
                kind: "low_stock",
                severity: stock_severity(stock_quantity),
                title: format!("{}: {} left", name, stock_quantity),
                related_id: id,
            });
        }

        let dated = [
            (
                "inspection_due",
                "Vehicle inspection",
                "SELECT id, name, vehicle_inspection_date AS date FROM heavy_equipment WHERE organization_id = $1 AND deleted_at IS NULL AND requires_vehicle_inspection AND vehicle_inspection_date <= $2",
            ),
            (
                "insurance_due",
                "Insurance",
                "SELECT id, name, insurance_end_date AS date FROM heavy_equipment WHERE organization_id = $1 AND deleted_at IS NULL AND insurance_end_date <= $2",
            ),
            (
                "warranty_expiring",
                "Warranty",
                "SELECT id, name, warranty_expiration_date AS date FROM tools WHERE organization_id = $1 AND deleted_at IS NULL AND warranty_expiration_date <= $2",
            ),
        ];
        for (kind, what, sql) in dated {
            let rows: Vec<DatedRow> = sqlx::query_as(sql)
                .bind(organization_id)
                .bind(today + Duration::days(ALERT_HORIZON_DAYS))
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                let Some(expiry) = Expiry::check(row.date, ALERT_HORIZON_DAYS, today) else {
                    continue;
                };
                alerts.push(Alert {
                    kind,
                    severity: expiry_severity(expiry),
                    title: format!("{} of {}: {}", what, row.name, row.date),
                    related_id: row.id,
                });
            }
        }

        alerts.sort_by_key(|a| a.severity != Severity::Critical);
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_role_sees_its_own_panels() {
        assert!(Panels::for_role(Role::Staff).own_attendance);
        assert!(!Panels::for_role(Role::Staff).purchase_orders);
        assert!(Panels::for_role(Role::Leader).team_attendance);

        let manager = Panels::for_role(Role::Manager);
        assert!(manager.inventory && manager.purchase_orders);
        assert!(!manager.organization);

        assert_eq!(
            Panels::for_role(Role::Admin),
            Panels {
                organization: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn empty_shelves_are_critical() {
        assert_eq!(stock_severity(0), Severity::Critical);
        assert_eq!(stock_severity(3), Severity::Warning);
    }

    #[test]
    fn month_bounds_roll_over_the_year() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(month_bounds(d(2024, 2, 29)), (d(2024, 2, 1), d(2024, 3, 1)));
        assert_eq!(month_bounds(d(2024, 12, 31)), (d(2024, 12, 1), d(2025, 1, 1)));
    }

    #[test]
    fn hidden_panels_are_left_out_of_the_payload() {
        let stats = DashboardStats {
            inventory: Some(Inventory { low_stock: 2 }),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&stats).unwrap(), serde_json::json!({ "inventory": { "low_stock": 2 } }));
    }
}
