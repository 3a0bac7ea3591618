// handlers/cron/mod.rs - POST /api/cron/:job (bearer CRON_SECRET)

use axum::extract::Path;
use serde_json::Value;

use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::cron_service::CronJob;
use crate::services::CronService;
use crate::types::business_today;

/// Run one scheduled job for the current business date and report what it did.
pub async fn run(Path(job): Path<String>) -> ApiResult<Value> {
    let job: CronJob = job.parse().map_err(ApiError::not_found)?;
    tracing::info!("Cron job {} triggered", job);
    let service = CronService::new(DatabaseManager::pool()?);
    let report = service.run(job, business_today()).await?;
    Ok(ApiResponse::success(report))
}
