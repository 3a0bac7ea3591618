// handlers/protected/attendance.rs - /api/attendance handlers

use axum::{extract::Query, Extension, Json};

use crate::database::models::AttendanceRecord;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::export::Attachment;
use crate::middleware::{ApiResponse, ApiResult, ValidatedUser};
use crate::services::attendance_service::{AttendanceQuery, MonthQuery, MonthlySummary, PunchInput};
use crate::services::AttendanceService;
use crate::types::{Listing, Role};

fn service() -> Result<AttendanceService, ApiError> {
    Ok(AttendanceService::new(DatabaseManager::pool()?))
}

pub async fn clock_in(Extension(user): Extension<ValidatedUser>, Json(input): Json<PunchInput>) -> ApiResult<AttendanceRecord> {
    let record = service()?.clock_in(user.organization_id, &user.worker(), input).await?;
    Ok(ApiResponse::created(record))
}

pub async fn clock_out(Extension(user): Extension<ValidatedUser>, Json(input): Json<PunchInput>) -> ApiResult<AttendanceRecord> {
    let record = service()?.clock_out(user.organization_id, &user.worker(), input).await?;
    Ok(ApiResponse::success(record))
}

/// Own records; managers may pass `user_id` or see everyone.
pub async fn list(
    Extension(user): Extension<ValidatedUser>,
    Query(query): Query<AttendanceQuery>,
) -> ApiResult<Listing<AttendanceRecord>> {
    Ok(ApiResponse::success(service()?.list(user.organization_id, &user.worker(), &query).await?))
}

pub async fn export(Extension(user): Extension<ValidatedUser>, Query(query): Query<AttendanceQuery>) -> Result<Attachment, ApiError> {
    service()?.export_csv(user.organization_id, &user.worker(), &query).await
}

/// GET /api/attendance/summary?year=2026&month=4
pub async fn summary(
    Extension(user): Extension<ValidatedUser>,
    Query(month): Query<MonthQuery>,
) -> ApiResult<Vec<MonthlySummary>> {
    Ok(ApiResponse::success(service()?.monthly_summary(user.organization_id, &user.worker(), &month).await?))
}

/// GET /api/attendance/office-qr
pub async fn office_qr(Extension(user): Extension<ValidatedUser>) -> Result<Attachment, ApiError> {
    user.require(Role::Manager)?;
    service()?.office_qr(user.organization_id)
}
