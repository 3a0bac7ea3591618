//! Scheduled jobs, triggered over HTTP by an external scheduler.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::mail::{mailer_from_config, Email, Mailer};
use crate::rate_limit::RateLimiter;
use crate::types::Role;

use super::billing_service::BillingService;
use super::contract_service::ContractService;
use super::equipment_service::Expiry;
use super::impersonation_service::ImpersonationService;
use super::notification_service::{NewNotification, NotificationService};
use super::tool_service::LOW_STOCK;

/// Read notifications older than this are purged.
const NOTIFICATION_RETENTION_DAYS: i32 = 90;

/// Tool warranties are flagged this many days ahead.
const WARRANTY_REMINDER_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CronJob {
    CreateMonthlyInvoices,
    ApplyPlanChanges,
    AutoDeactivateUsers,
    CheckLowStock,
    CheckEquipmentExpiration,
    CheckWarrantyExpiration,
    Cleanup,
}

impl CronJob {
    pub const ALL: [CronJob; 7] = [
        CronJob::CreateMonthlyInvoices,
        CronJob::ApplyPlanChanges,
        CronJob::AutoDeactivateUsers,
        CronJob::CheckLowStock,
        CronJob::CheckEquipmentExpiration,
        CronJob::CheckWarrantyExpiration,
        CronJob::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CronJob::CreateMonthlyInvoices => "create-monthly-invoices",
            CronJob::ApplyPlanChanges => "apply-plan-changes",
            CronJob::AutoDeactivateUsers => "auto-deactivate-users",
            CronJob::CheckLowStock => "check-low-stock",
            CronJob::CheckEquipmentExpiration => "check-equipment-expiration",
            CronJob::CheckWarrantyExpiration => "check-warranty-expiration",
            CronJob::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for CronJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CronJob {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronJob::ALL
            .into_iter()
            .find(|job| job.as_str() == s)
            .ok_or_else(|| format!("unknown cron job: {}", s))
    }
}

#[derive(Debug, FromRow)]
struct Deactivated {
    id: Uuid,
    organization_id: Uuid,
}

#[derive(Debug, FromRow)]
struct LowStock {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    stock_quantity: i32,
    min_stock: i32,
    unit: Option<String>,
}

#[derive(Debug, FromRow)]
struct DatedEquipment {
    id: Uuid,
    organization_id: Uuid,
    equipment_code: String,
    name: String,
    requires_vehicle_inspection: bool,
    vehicle_inspection_date: Option<NaiveDate>,
    inspection_reminder_days: i32,
    insurance_end_date: Option<NaiveDate>,
    insurance_reminder_days: i32,
}

#[derive(Debug, FromRow)]
struct Warranty {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    model_number: Option<String>,
    warranty_expiration_date: NaiveDate,
}

/// Which equipment date a reminder is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    VehicleInspection,
    Insurance,
}

impl Deadline {
    /// Notification kind; reminders are deduplicated per kind and equipment.
    pub fn kind(&self) -> &'static str {
        match self {
            Deadline::VehicleInspection => "inspection_due",
            Deadline::Insurance => "insurance_due",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Deadline::VehicleInspection => "Vehicle inspection",
            Deadline::Insurance => "Insurance",
        }
    }
}

/// Title and message of a reminder for `subject`, which expires on `date`.
pub fn expiry_notice(what: &str, subject: &str, date: NaiveDate, expiry: Expiry) -> (String, String) {
    match expiry {
        Expiry::Expired { .. } => (
            format!("{} expired: {}", what, subject),
            format!("{} of {} expired on {}.", what, subject, date),
        ),
        Expiry::DueSoon { days_left } => (
            format!("{} due in {} days: {}", what, days_left, subject),
            format!("{} of {} expires on {} ({} days left).", what, subject, date, days_left),
        ),
    }
}

pub struct CronService {
    pool: PgPool,
}

impl CronService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run(&self, job: CronJob, today: NaiveDate) -> Result<Value, ApiError> {
        info!("Cron job {} starting for {}", job, today);
        let report = match job {
            CronJob::CreateMonthlyInvoices => {
                let run = BillingService::new(self.pool.clone()).create_monthly_invoices(today).await?;
                serde_json::to_value(run).unwrap_or(Value::Null)
            }
            CronJob::ApplyPlanChanges => {
                let applied = ContractService::new(self.pool.clone()).apply_plan_changes(today).await?;
                json!({ "applied": applied.iter().map(|c| c.id).collect::<Vec<_>>() })
            }
            CronJob::AutoDeactivateUsers => self.auto_deactivate_users(today).await?,
            CronJob::CheckLowStock => self.check_low_stock().await?,
            CronJob::CheckEquipmentExpiration => self.check_equipment_expiration(today).await?,
            CronJob::CheckWarrantyExpiration => self.check_warranty_expiration(today).await?,
            CronJob::Cleanup => self.cleanup().await?,
        };
        info!("Cron job {} finished: {}", job, report);
        Ok(json!({ "job": job, "date": today, "report": report }))
    }

    /// Close contracts past their end date, deactivate users of organizations
    /// left without an active contract, then enforce seat limits by
    /// deactivating the most recently added non-admin users.
    async fn auto_deactivate_users(&self, today: NaiveDate) -> Result<Value, ApiError> {
        let mut tx = self.pool.begin().await?;
        let closed: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE contracts SET status = 'completed', updated_at = now()
            WHERE status = 'active' AND end_date < $1
            RETURNING id
            "#,
        )
        .bind(today)
        .fetch_all(&mut *tx)
        .await?;

        let ended: Vec<Deactivated> = sqlx::query_as(
            r#"
            UPDATE users SET is_active = FALSE, updated_at = now()
            WHERE is_active AND deleted_at IS NULL
              AND organization_id IN (
                  SELECT c.organization_id FROM contracts c
                  WHERE c.status IN ('completed', 'cancelled') AND c.end_date < $1
                    AND NOT EXISTS (
                        SELECT 1 FROM contracts a WHERE a.organization_id = c.organization_id AND a.status = 'active'
                    )
              )
            RETURNING id, organization_id
            "#,
        )
        .bind(today)
        .fetch_all(&mut *tx)
        .await?;

        let over_limit: Vec<Deactivated> = sqlx::query_as(
            r#"
            UPDATE users SET is_active = FALSE, updated_at = now()
            WHERE id IN (
                SELECT id FROM (
                    SELECT u.id, o.max_users,
                           row_number() OVER (
                               PARTITION BY u.organization_id
                               ORDER BY (u.role = 'admin') DESC, u.created_at ASC
                           ) AS seat
                    FROM users u
                    JOIN organizations o ON o.id = u.organization_id
                    WHERE u.is_active AND u.deleted_at IS NULL
                ) ranked
                WHERE seat > max_users
            )
            RETURNING id, organization_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        for user in ended.iter().chain(&over_limit) {
            info!("Deactivated user {} of org {}", user.id, user.organization_id);
        }
        Ok(json!({
            "contracts_completed": closed.len(),
            "contract_ended": ended.iter().map(|u| u.id).collect::<Vec<_>>(),
            "over_seat_limit": over_limit.iter().map(|u| u.id).collect::<Vec<_>>(),
        }))
    }

    /// Notify managers about consumables at or below minimum stock, once a day per tool.
    async fn check_low_stock(&self) -> Result<Value, ApiError> {
        let tools: Vec<LowStock> = sqlx::query_as(&format!(
            r#"
            SELECT t.id, t.organization_id, t.name, t.stock_quantity, t.min_stock, t.unit
            FROM tools t
            JOIN organizations o ON o.id = t.organization_id AND o.is_active
            WHERE t.deleted_at IS NULL AND t.is_consumable AND {}
              AND NOT EXISTS (
                  SELECT 1 FROM notifications n
                  WHERE n.kind = 'low_stock' AND n.related_id = t.id AND n.created_at > now() - interval '1 day'
              )
            "#,
            LOW_STOCK
        ))
        .fetch_all(&self.pool)
        .await?;

        let notifications = NotificationService::new(self.pool.clone());
        let recipients = Role::at_or_above(Role::Manager);
        let mut notified = 0u64;
        for tool in &tools {
            let unit = tool.unit.as_deref().unwrap_or("");
            let message = NewNotification::new(
                "low_stock",
                format!("Low stock: {}", tool.name),
                format!(
                    "{} has {}{} left (minimum {}{}).",
                    tool.name, tool.stock_quantity, unit, tool.min_stock, unit
                ),
            )
            .related("tool", tool.id);
            notified += notifications
                .notify_roles(tool.organization_id, &recipients, None, &message)
                .await;
        }

        Ok(json!({ "tools": tools.len(), "notifications": notified }))
    }

    /// Whether `kind` was already sent about `related_id` in the last day.
    async fn notified_recently(&self, kind: &str, related_id: Uuid) -> Result<bool, ApiError> {
        let (recent,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notifications
                WHERE kind = $1 AND related_id = $2 AND created_at > now() - interval '1 day'
            )
            "#,
        )
        .bind(kind)
        .bind(related_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(recent)
    }

    /// Remind managers of vehicle inspections and insurance policies that
    /// lapse within each machine's reminder window, at most once a day.
    async fn check_equipment_expiration(&self, today: NaiveDate) -> Result<Value, ApiError> {
        let equipment: Vec<DatedEquipment> = sqlx::query_as(
            r#"
            SELECT e.id, e.organization_id, e.equipment_code, e.name, e.requires_vehicle_inspection,
                   e.vehicle_inspection_date, e.inspection_reminder_days, e.insurance_end_date, e.insurance_reminder_days
            FROM heavy_equipment e
            JOIN organizations o ON o.id = e.organization_id AND o.is_active
            WHERE e.deleted_at IS NULL
              AND (e.vehicle_inspection_date IS NOT NULL OR e.insurance_end_date IS NOT NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let notifications = NotificationService::new(self.pool.clone());
        let recipients = Role::at_or_above(Role::Manager);
        let (mut due, mut notified) = (0usize, 0u64);
        for item in &equipment {
            let inspection = item
                .vehicle_inspection_date
                .filter(|_| item.requires_vehicle_inspection)
                .map(|date| (Deadline::VehicleInspection, date, item.inspection_reminder_days));
            let insurance = item
                .insurance_end_date
                .map(|date| (Deadline::Insurance, date, item.insurance_reminder_days));

            for (deadline, date, reminder_days) in inspection.into_iter().chain(insurance) {
                let Some(expiry) = Expiry::check(date, reminder_days as i64, today) else {
                    continue;
                };
                due += 1;
                if self.notified_recently(deadline.kind(), item.id).await? {
                    continue;
                }
                let subject = format!("{} ({})", item.name, item.equipment_code);
                let (title, message) = expiry_notice(deadline.label(), &subject, date, expiry);
                let notice = NewNotification::new(deadline.kind(), title, message).related("equipment", item.id);
                notified += notifications
                    .notify_roles(item.organization_id, &recipients, None, &notice)
                    .await;
            }
        }

        Ok(json!({ "equipment": equipment.len(), "due": due, "notifications": notified }))
    }

    /// Notify managers and email admins about tool warranties ending within
    /// 30 days, at most once a day per tool.
    async fn check_warranty_expiration(&self, today: NaiveDate) -> Result<Value, ApiError> {
        let tools: Vec<Warranty> = sqlx::query_as(
            r#"
            SELECT t.id, t.organization_id, t.name, t.model_number, t.warranty_expiration_date
            FROM tools t
            JOIN organizations o ON o.id = t.organization_id AND o.is_active
            WHERE t.deleted_at IS NULL AND t.warranty_expiration_date IS NOT NULL
              AND t.warranty_expiration_date <= $1::date + $2::int
            "#,
        )
        .bind(today)
        .bind(WARRANTY_REMINDER_DAYS as i32)
        .fetch_all(&self.pool)
        .await?;

        let notifications = NotificationService::new(self.pool.clone());
        let mailer = mailer_from_config();
        let recipients = Role::at_or_above(Role::Manager);
        let (mut notified, mut emailed) = (0u64, 0usize);
        for tool in &tools {
            let Some(expiry) = Expiry::check(tool.warranty_expiration_date, WARRANTY_REMINDER_DAYS, today) else {
                continue;
            };
            if self.notified_recently("warranty_expiring", tool.id).await? {
                continue;
            }
            let subject = match &tool.model_number {
                Some(model) => format!("{} ({})", tool.name, model),
                None => tool.name.clone(),
            };
            let (title, message) = expiry_notice("Warranty", &subject, tool.warranty_expiration_date, expiry);
            let notice = NewNotification::new("warranty_expiring", title.clone(), message.clone()).related("tool", tool.id);
            notified += notifications
                .notify_roles(tool.organization_id, &recipients, None, &notice)
                .await;

            let admins: Vec<(String,)> = sqlx::query_as(
                "SELECT email FROM users WHERE organization_id = $1 AND role = 'admin' AND is_active AND deleted_at IS NULL",
            )
            .bind(tool.organization_id)
            .fetch_all(&self.pool)
            .await?;
            for (to,) in admins {
                match mailer.send(&Email::new(to, title.clone(), message.clone())).await {
                    Ok(()) => emailed += 1,
                    Err(e) => error!("Warranty reminder for tool {} not mailed: {}", tool.id, e),
                }
            }
        }

        Ok(json!({ "tools": tools.len(), "notifications": notified, "emails": emailed }))
    }

    async fn cleanup(&self) -> Result<Value, ApiError> {
        let tokens = ImpersonationService::new(self.pool.clone()).purge_expired().await?;
        let windows = RateLimiter::new(self.pool.clone()).purge_expired().await?;
        let notifications = sqlx::query(
            "DELETE FROM notifications WHERE is_read AND created_at < now() - make_interval(days => $1)",
        )
        .bind(NOTIFICATION_RETENTION_DAYS)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(json!({
            "impersonation_tokens": tokens,
            "rate_limits": windows,
            "notifications": notifications,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_round_trip_through_urls() {
        for job in CronJob::ALL {
            assert_eq!(job.as_str().parse::<CronJob>().unwrap(), job);
        }
        assert!("send-newsletter".parse::<CronJob>().is_err());
        assert_eq!(serde_json::to_value(CronJob::CheckLowStock).unwrap(), "check-low-stock");
        assert_eq!(
            "check-equipment-expiration".parse::<CronJob>().unwrap(),
            CronJob::CheckEquipmentExpiration
        );
    }

    #[test]
    fn expiry_notices_read_differently_once_lapsed() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let (title, message) = expiry_notice("Insurance", "Crane (CR-2)", date, Expiry::DueSoon { days_left: 12 });
        assert_eq!(title, "Insurance due in 12 days: Crane (CR-2)");
        assert_eq!(message, "Insurance of Crane (CR-2) expires on 2024-07-01 (12 days left).");

        let (title, _) = expiry_notice("Insurance", "Crane (CR-2)", date, Expiry::Expired { days_overdue: 3 });
        assert_eq!(title, "Insurance expired: Crane (CR-2)");
    }

    #[test]
    fn inspection_and_insurance_reminders_are_kept_apart() {
        assert_ne!(Deadline::VehicleInspection.kind(), Deadline::Insurance.kind());
    }
}
