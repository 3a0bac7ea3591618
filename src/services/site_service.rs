use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::models::Site;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SiteInput {
    pub name: String,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

pub struct SiteService {
    pool: PgPool,
}

impl SiteService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, organization_id: Uuid, include_inactive: bool) -> Result<Vec<Site>, ApiError> {
        let sites = sqlx::query_as(
            "SELECT * FROM sites WHERE organization_id = $1 AND ($2 OR is_active) ORDER BY name",
        )
        .bind(organization_id)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        Ok(sites)
    }

    pub async fn create(&self, organization_id: Uuid, input: SiteInput) -> Result<Site, ApiError> {
        if input.name.trim().is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        let site: Site = sqlx::query_as(
            "INSERT INTO sites (organization_id, name, address, is_active) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(organization_id)
        .bind(input.name.trim())
        .bind(&input.address)
        .bind(input.is_active.unwrap_or(true))
        .fetch_one(&self.pool)
        .await?;
        info!("Site '{}' created in org {}", site.name, organization_id);
        Ok(site)
    }

    pub async fn update(&self, organization_id: Uuid, id: Uuid, input: SiteInput) -> Result<Site, ApiError> {
        if input.name.trim().is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        sqlx::query_as(
            r#"
            UPDATE sites SET name = $3, address = $4, is_active = COALESCE($5, is_active)
            WHERE id = $1 AND organization_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(input.name.trim())
        .bind(&input.address)
        .bind(input.is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Site not found"))
    }
}
