//! Clock-in / clock-out and monthly attendance reporting.
//!
//! Dates are business dates in the configured UTC offset. A night-shift
//! worker punching in before the boundary hour belongs to the previous day.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::database::models::AttendanceRecord;
use crate::error::ApiError;
use crate::export::csv::{cell, write_csv};
use crate::export::qr::qr_svg;
use crate::export::Attachment;
use crate::types::{business_now, business_offset, Listing, Page, Role};

use super::audit_service::{AuditEntry, AuditService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchMethod {
    Manual,
    Qr,
}

impl PunchMethod {
    fn as_str(&self) -> &'static str {
        match self {
            PunchMethod::Manual => "manual",
            PunchMethod::Qr => "qr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Office,
    Site,
    Remote,
}

impl LocationType {
    fn as_str(&self) -> &'static str {
        match self {
            LocationType::Office => "office",
            LocationType::Site => "site",
            LocationType::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PunchInput {
    pub method: PunchMethod,
    pub location_type: Option<LocationType>,
    pub site_id: Option<Uuid>,
    /// Scanned value for `method = qr`.
    pub qr_data: Option<String>,
    pub break_minutes: Option<i32>,
    pub notes: Option<String>,
}

/// Payload printed on attendance QR posters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttendanceQr {
    Office(Uuid),
    Site(Uuid),
}

impl AttendanceQr {
    pub fn encode(&self) -> String {
        match self {
            AttendanceQr::Office(org) => format!("genba:office:{}", org),
            AttendanceQr::Site(site) => format!("genba:site:{}", site),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().splitn(3, ':');
        if parts.next()? != "genba" {
            return None;
        }
        let kind = parts.next()?;
        let id = Uuid::parse_str(parts.next()?).ok()?;
        match kind {
            "office" => Some(AttendanceQr::Office(id)),
            "site" => Some(AttendanceQr::Site(id)),
            _ => None,
        }
    }
}

/// Location and site a punch resolves to after QR decoding and validation.
pub fn resolve_location(organization_id: Uuid, input: &PunchInput) -> Result<(LocationType, Option<Uuid>), ApiError> {
    match input.method {
        PunchMethod::Qr => {
            let raw = input
                .qr_data
                .as_deref()
                .ok_or_else(|| ApiError::field("qr_data", "QR data is required for QR punches"))?;
            match AttendanceQr::parse(raw) {
                Some(AttendanceQr::Office(org)) if org == organization_id => Ok((LocationType::Office, None)),
                Some(AttendanceQr::Site(site)) => Ok((LocationType::Site, Some(site))),
                _ => Err(ApiError::field("qr_data", "QR code is not valid for this organization")),
            }
        }
        PunchMethod::Manual => {
            let location = input
                .location_type
                .ok_or_else(|| ApiError::field("location_type", "Location type is required"))?;
            match (location, input.site_id) {
                (LocationType::Site, None) => Err(ApiError::field("site_id", "A site is required for site punches")),
                (LocationType::Site, site) => Ok((location, site)),
                (other, _) => Ok((other, None)),
            }
        }
    }
}

/// Business date a clock-in at `local` is recorded under.
pub fn business_date(local: DateTime<FixedOffset>, night_shift: bool, boundary_hour: u32) -> NaiveDate {
    let date = local.date_naive();
    if night_shift && local.hour() < boundary_hour {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Minutes between the punches less the break, never negative.
pub fn worked_minutes(clock_in: DateTime<Utc>, clock_out: DateTime<Utc>, break_minutes: i32) -> i32 {
    let elapsed = (clock_out - clock_in).num_minutes();
    (elapsed - i64::from(break_minutes)).clamp(0, i64::from(i32::MAX)) as i32
}

/// Overtime past the standard day, floored to 15 minute steps.
pub fn overtime_minutes(worked: i64, standard: i64) -> i64 {
    if worked <= standard {
        0
    } else {
        (worked - standard) / 15 * 15
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct MonthlySummary {
    pub user_id: Uuid,
    pub user_name: String,
    pub days_worked: i64,
    pub completed_days: i64,
    pub incomplete_days: i64,
    pub total_work_minutes: i64,
    pub total_break_minutes: i64,
    pub overtime_days: i64,
    pub overtime_minutes: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SummaryRow {
    pub user_id: Uuid,
    pub user_name: String,
    pub clock_in_time: DateTime<Utc>,
    pub clock_out_time: Option<DateTime<Utc>>,
    pub break_minutes: i32,
}

/// Fold raw records into one summary per user, ordered by name.
pub fn summarize(rows: &[SummaryRow], standard_minutes: i64) -> Vec<MonthlySummary> {
    let mut by_user: BTreeMap<Uuid, MonthlySummary> = BTreeMap::new();
    for row in rows {
        let summary = by_user.entry(row.user_id).or_insert_with(|| MonthlySummary {
            user_id: row.user_id,
            user_name: row.user_name.clone(),
            ..Default::default()
        });
        summary.days_worked += 1;
        match row.clock_out_time {
            Some(out) => {
                let worked = i64::from(worked_minutes(row.clock_in_time, out, row.break_minutes));
                summary.completed_days += 1;
                summary.total_work_minutes += worked;
                summary.total_break_minutes += i64::from(row.break_minutes);
                let overtime = overtime_minutes(worked, standard_minutes);
                if worked > standard_minutes {
                    summary.overtime_days += 1;
                }
                summary.overtime_minutes += overtime;
            }
            None => summary.incomplete_days += 1,
        }
    }
    let mut summaries: Vec<MonthlySummary> = by_user.into_values().collect();
    summaries.sort_by(|a, b| a.user_name.cmp(&b.user_name));
    summaries
}

/// First and last day of a month.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ApiError::field("month", "Month must be between 1 and 12"))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| ApiError::field("year", "Year is out of range"))?;
    Ok((first, next - Duration::days(1)))
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceQuery {
    pub user_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32,
}

/// The punching user, as loaded by the session middleware.
#[derive(Debug, Clone, Copy)]
pub struct Worker {
    pub user_id: Uuid,
    pub role: Role,
    pub night_shift: bool,
}

pub struct AttendanceService {
    pool: PgPool,
}

impl AttendanceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_site(&self, organization_id: Uuid, site_id: Uuid) -> Result<(), ApiError> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM sites WHERE id = $1 AND organization_id = $2")
            .bind(site_id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;
        found.map(|_| ()).ok_or_else(|| ApiError::not_found("Site not found"))
    }

    async fn record_on(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<AttendanceRecord>, ApiError> {
        let record = sqlx::query_as("SELECT * FROM attendance_records WHERE user_id = $1 AND date = $2")
            .bind(user_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn clock_in(&self, organization_id: Uuid, worker: &Worker, input: PunchInput) -> Result<AttendanceRecord, ApiError> {
        let settings = &config::config().attendance;
        let (location, site_id) = resolve_location(organization_id, &input)?;
        if let Some(site) = site_id {
            self.ensure_site(organization_id, site).await?;
        }

        let now = business_now();
        let date = business_date(now, worker.night_shift, settings.night_shift_boundary_hour);

        if self.record_on(worker.user_id, date).await?.is_some() {
            return Err(ApiError::conflict(format!("Already clocked in for {}", date)));
        }

        let window_start = Utc::now() - Duration::minutes(settings.duplicate_punch_minutes);
        let (recent,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM attendance_records WHERE user_id = $1 AND clock_in_time >= $2)",
        )
        .bind(worker.user_id)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;
        if recent {
            return Err(ApiError::bad_request(format!(
                "Already punched within the last {} minutes",
                settings.duplicate_punch_minutes
            )));
        }

        let record: AttendanceRecord = sqlx::query_as(
            r#"
            INSERT INTO attendance_records
                (organization_id, user_id, date, clock_in_time, clock_in_method, clock_in_location_type, site_id, notes)
            VALUES ($1, $2, $3, now(), $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(worker.user_id)
        .bind(date)
        .bind(input.method.as_str())
        .bind(location.as_str())
        .bind(site_id)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await?;

        info!("User {} clocked in for {} ({})", worker.user_id, date, location.as_str());
        Ok(record)
    }

    /// The record a clock-out closes: today's, or for night shifts an
    /// open record from yesterday that started late in the day.
    async fn open_record(&self, worker: &Worker) -> Result<AttendanceRecord, ApiError> {
        let settings = &config::config().attendance;
        let now = business_now();
        let today = now.date_naive();

        if let Some(record) = self.record_on(worker.user_id, today).await? {
            return Ok(record);
        }

        if worker.night_shift {
            let yesterday = today.pred_opt().unwrap_or(today);
            if let Some(record) = self.record_on(worker.user_id, yesterday).await? {
                if record.clock_out_time.is_none() {
                    let started = record.clock_in_time.with_timezone(&business_offset());
                    if started.hour() >= settings.night_shift_late_clock_in_hour {
                        return Ok(record);
                    }
                    return Err(ApiError::bad_request(format!(
                        "An open record from {} must be closed first",
                        yesterday
                    )));
                }
            }
        }

        Err(ApiError::bad_request("Not clocked in; clock in first"))
    }

    pub async fn clock_out(&self, organization_id: Uuid, worker: &Worker, input: PunchInput) -> Result<AttendanceRecord, ApiError> {
        let break_minutes = input.break_minutes.unwrap_or(0);
        if break_minutes < 0 {
            return Err(ApiError::field("break_minutes", "Break minutes cannot be negative"));
        }
        let (location, site_id) = resolve_location(organization_id, &input)?;
        if let Some(site) = site_id {
            self.ensure_site(organization_id, site).await?;
        }

        let record = self.open_record(worker).await?;
        if record.clock_out_time.is_some() {
            return Err(ApiError::conflict("Already clocked out"));
        }

        let now = Utc::now();
        let worked = worked_minutes(record.clock_in_time, now, break_minutes);
        let updated: AttendanceRecord = sqlx::query_as(
            r#"
            UPDATE attendance_records
            SET clock_out_time = $2, clock_out_method = $3, clock_out_location_type = $4,
                clock_out_site_id = $5, break_minutes = $6, worked_minutes = $7,
                notes = COALESCE($8, notes), updated_at = now()
            WHERE id = $1 AND clock_out_time IS NULL
            RETURNING *
            "#,
        )
        .bind(record.id)
        .bind(now)
        .bind(input.method.as_str())
        .bind(location.as_str())
        .bind(site_id)
        .bind(break_minutes)
        .bind(worked)
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::conflict("Already clocked out"))?;

        info!("User {} clocked out for {} ({} min)", worker.user_id, record.date, worked);
        AuditService::new(self.pool.clone())
            .record(AuditEntry::new(organization_id, worker.user_id, "clock_out", "attendance_record").entity(record.id))
            .await;
        Ok(updated)
    }

    /// Whose records a caller may see: staff and leaders only their own.
    fn scope(worker: &Worker, requested: Option<Uuid>) -> Result<Option<Uuid>, ApiError> {
        if worker.role.at_least(Role::Manager) {
            return Ok(requested);
        }
        match requested {
            Some(id) if id != worker.user_id => Err(ApiError::forbidden("Only managers can view other users' attendance")),
            _ => Ok(Some(worker.user_id)),
        }
    }

    pub async fn list(&self, organization_id: Uuid, worker: &Worker, query: &AttendanceQuery) -> Result<Listing<AttendanceRecord>, ApiError> {
        let user_id = Self::scope(worker, query.user_id)?;
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();

        let filter = r#"
            WHERE organization_id = $1
              AND ($2::uuid IS NULL OR user_id = $2)
              AND ($3::date IS NULL OR date >= $3)
              AND ($4::date IS NULL OR date <= $4)
        "#;
        let items: Vec<AttendanceRecord> = sqlx::query_as(&format!(
            "SELECT * FROM attendance_records {} ORDER BY date DESC, clock_in_time DESC LIMIT $5 OFFSET $6",
            filter
        ))
        .bind(organization_id)
        .bind(user_id)
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM attendance_records {}", filter))
            .bind(organization_id)
            .bind(user_id)
            .bind(query.from)
            .bind(query.to)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn export_csv(&self, organization_id: Uuid, worker: &Worker, query: &AttendanceQuery) -> Result<Attachment, ApiError> {
        let user_id = Self::scope(worker, query.user_id)?;

        #[derive(FromRow)]
        struct ExportRow {
            date: NaiveDate,
            user_name: String,
            clock_in_time: DateTime<Utc>,
            clock_out_time: Option<DateTime<Utc>>,
            clock_in_location_type: String,
            break_minutes: i32,
            worked_minutes: Option<i32>,
            notes: Option<String>,
        }

        let rows: Vec<ExportRow> = sqlx::query_as(
            r#"
            SELECT a.date, u.name AS user_name, a.clock_in_time, a.clock_out_time,
                   a.clock_in_location_type, a.break_minutes, a.worked_minutes, a.notes
            FROM attendance_records a
            JOIN users u ON u.id = a.user_id
            WHERE a.organization_id = $1
              AND ($2::uuid IS NULL OR a.user_id = $2)
              AND ($3::date IS NULL OR a.date >= $3)
              AND ($4::date IS NULL OR a.date <= $4)
            ORDER BY a.date, u.name
            "#,
        )
        .bind(organization_id)
        .bind(user_id)
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&self.pool)
        .await?;

        let offset = business_offset();
        let local = |t: DateTime<Utc>| t.with_timezone(&offset).format("%H:%M").to_string();
        let body = write_csv(
            &["date", "name", "clock_in", "clock_out", "location", "break_minutes", "worked_minutes", "notes"],
            rows.iter().map(|r| {
                vec![
                    r.date.to_string(),
                    r.user_name.clone(),
                    local(r.clock_in_time),
                    r.clock_out_time.map(local).unwrap_or_default(),
                    r.clock_in_location_type.clone(),
                    r.break_minutes.to_string(),
                    cell(&r.worked_minutes),
                    cell(&r.notes),
                ]
            }),
        )?;

        Ok(Attachment::csv(
            format!("attendance_{}.csv", business_now().format("%Y%m%d")),
            body,
        ))
    }

    pub async fn monthly_summary(&self, organization_id: Uuid, worker: &Worker, month: &MonthQuery) -> Result<Vec<MonthlySummary>, ApiError> {
        let user_id = Self::scope(worker, None)?;
        let (first, last) = month_bounds(month.year, month.month)?;

        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT a.user_id, u.name AS user_name, a.clock_in_time, a.clock_out_time, a.break_minutes
            FROM attendance_records a
            JOIN users u ON u.id = a.user_id
            WHERE a.organization_id = $1 AND a.date BETWEEN $2 AND $3
              AND ($4::uuid IS NULL OR a.user_id = $4)
            "#,
        )
        .bind(organization_id)
        .bind(first)
        .bind(last)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(summarize(&rows, config::config().attendance.standard_work_minutes))
    }

    /// QR poster for punching at a site.
    pub async fn site_qr(&self, organization_id: Uuid, site_id: Uuid) -> Result<Attachment, ApiError> {
        self.ensure_site(organization_id, site_id).await?;
        let svg = qr_svg(&AttendanceQr::Site(site_id).encode(), 320)?;
        Ok(Attachment::svg(format!("site-{}.svg", site_id), svg))
    }

    /// QR poster for punching at the office.
    pub fn office_qr(&self, organization_id: Uuid) -> Result<Attachment, ApiError> {
        let svg = qr_svg(&AttendanceQr::Office(organization_id).encode(), 320)?;
        Ok(Attachment::svg("office.svg", svg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn manual(location: LocationType, site_id: Option<Uuid>) -> PunchInput {
        PunchInput {
            method: PunchMethod::Manual,
            location_type: Some(location),
            site_id,
            qr_data: None,
            break_minutes: None,
            notes: None,
        }
    }

    #[test]
    fn night_shift_early_morning_belongs_to_previous_day() {
        let at = jst().with_ymd_and_hms(2026, 3, 10, 3, 30, 0).unwrap();
        assert_eq!(business_date(at, true, 5), NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert_eq!(business_date(at, false, 5), NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());

        let after = jst().with_ymd_and_hms(2026, 3, 10, 5, 0, 0).unwrap();
        assert_eq!(business_date(after, true, 5), NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
    }

    #[test]
    fn night_shift_on_first_of_month_rolls_back() {
        let at = jst().with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        assert_eq!(business_date(at, true, 5), NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
    }

    #[test]
    fn worked_minutes_subtract_break_and_floor_at_zero() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(worked_minutes(start, start + Duration::minutes(540), 60), 480);
        assert_eq!(worked_minutes(start, start + Duration::minutes(30), 60), 0);
    }

    #[test]
    fn overtime_is_floored_to_quarter_hours() {
        assert_eq!(overtime_minutes(480, 480), 0);
        assert_eq!(overtime_minutes(494, 480), 0);
        assert_eq!(overtime_minutes(510, 480), 30);
        assert_eq!(overtime_minutes(524, 480), 30);
    }

    #[test]
    fn site_punch_requires_site() {
        let org = Uuid::new_v4();
        let err = resolve_location(org, &manual(LocationType::Site, None)).unwrap_err();
        assert_eq!(err.to_json()["field_errors"]["site_id"], "A site is required for site punches");

        let site = Uuid::new_v4();
        assert_eq!(
            resolve_location(org, &manual(LocationType::Site, Some(site))).unwrap(),
            (LocationType::Site, Some(site))
        );
        // site id is ignored away from a site
        assert_eq!(
            resolve_location(org, &manual(LocationType::Remote, Some(site))).unwrap(),
            (LocationType::Remote, None)
        );
    }

    #[test]
    fn qr_punch_decodes_location() {
        let org = Uuid::new_v4();
        let site = Uuid::new_v4();
        let mut input = manual(LocationType::Office, None);
        input.method = PunchMethod::Qr;

        input.qr_data = Some(AttendanceQr::Site(site).encode());
        assert_eq!(resolve_location(org, &input).unwrap(), (LocationType::Site, Some(site)));

        input.qr_data = Some(AttendanceQr::Office(org).encode());
        assert_eq!(resolve_location(org, &input).unwrap(), (LocationType::Office, None));

        input.qr_data = Some(AttendanceQr::Office(Uuid::new_v4()).encode());
        assert!(resolve_location(org, &input).is_err());

        input.qr_data = None;
        assert!(resolve_location(org, &input).is_err());
    }

    #[test]
    fn summary_counts_overtime_and_open_days() {
        let alice = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let row = |day: i64, minutes: Option<i64>| SummaryRow {
            user_id: alice,
            user_name: "Alice".to_string(),
            clock_in_time: start + Duration::days(day),
            clock_out_time: minutes.map(|m| start + Duration::days(day) + Duration::minutes(m)),
            break_minutes: 60,
        };
        let rows = vec![row(0, Some(540)), row(1, Some(600)), row(2, None)];
        let summary = summarize(&rows, 480);

        assert_eq!(summary.len(), 1);
        let s = &summary[0];
        assert_eq!(s.days_worked, 3);
        assert_eq!(s.completed_days, 2);
        assert_eq!(s.incomplete_days, 1);
        assert_eq!(s.total_work_minutes, 480 + 540);
        assert_eq!(s.overtime_days, 1);
        assert_eq!(s.overtime_minutes, 60);
    }

    #[test]
    fn month_bounds_handle_december_and_leap_years() {
        assert_eq!(
            month_bounds(2026, 12).unwrap(),
            (NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(), NaiveDate::from_ymd_opt(2026, 12, 31).unwrap())
        );
        assert_eq!(month_bounds(2028, 2).unwrap().1, NaiveDate::from_ymd_opt(2028, 2, 29).unwrap());
        assert!(month_bounds(2026, 13).is_err());
    }
}
