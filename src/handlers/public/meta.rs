// handlers/public/meta.rs - GET / and GET /health

use serde_json::{json, Value};

use crate::config;
use crate::database::DatabaseManager;
use crate::middleware::{ApiResponse, ApiResult};

pub async fn root() -> ApiResponse<Value> {
    ApiResponse::success(json!({
        "name": "Genba API",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": config::config().environment,
    }))
}

/// Reports degraded rather than failing so load balancers can tell the
/// process is up while the database is not.
pub async fn health() -> ApiResult<Value> {
    let database = match DatabaseManager::health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Health check could not reach the database: {}", e);
            "unavailable"
        }
    };
    Ok(ApiResponse::success(json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "database": database,
    })))
}
