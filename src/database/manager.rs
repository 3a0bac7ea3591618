use once_cell::sync::OnceCell;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config;

/// Errors from DatabaseManager and the services built on it
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

static POOL: OnceCell<PgPool> = OnceCell::new();

/// Owner of the shared connection pool. The pool is created lazily on first
/// use; no connection is opened until a query runs.
pub struct DatabaseManager;

impl DatabaseManager {
    /// Shared pool for all tenants. Isolation is by `organization_id`.
    pub fn pool() -> Result<PgPool, DatabaseError> {
        POOL.get_or_try_init(|| {
            let url = std::env::var("DATABASE_URL")
                .map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;
            let url = Self::parse_database_url(&url)?;
            let settings = &config::config().database;

            let pool = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(Duration::from_secs(settings.connection_timeout))
                .connect_lazy(url.as_str())?;

            info!(
                "Created database pool for {} (max {} connections)",
                url.host_str().unwrap_or("localhost"),
                settings.max_connections
            );
            Ok(pool)
        })
        .cloned()
    }

    fn parse_database_url(raw: &str) -> Result<url::Url, DatabaseError> {
        let url = url::Url::parse(raw).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        match url.scheme() {
            "postgres" | "postgresql" => Ok(url),
            _ => Err(DatabaseError::InvalidDatabaseUrl),
        }
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check() -> Result<(), DatabaseError> {
        let pool = Self::pool()?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate() -> Result<(), DatabaseError> {
        let pool = Self::pool()?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Close the pool (e.g., on shutdown)
    pub async fn close() {
        if let Some(pool) = POOL.get() {
            pool.close().await;
            info!("Closed database pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_postgres_urls_only() {
        assert!(DatabaseManager::parse_database_url("postgres://u:p@localhost:5432/genba").is_ok());
        assert!(DatabaseManager::parse_database_url("postgresql://localhost/genba?sslmode=disable").is_ok());
        assert!(matches!(
            DatabaseManager::parse_database_url("mysql://localhost/genba"),
            Err(DatabaseError::InvalidDatabaseUrl)
        ));
        assert!(DatabaseManager::parse_database_url("not a url").is_err());
    }
}
