use axum::{extract::Request, middleware::Next, response::Response};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::auth::{validate_jwt, AdminClaims, TokenError, ADMIN_AUDIENCE, ADMIN_COOKIE};
use crate::database::DatabaseManager;
use crate::error::ApiError;

/// Super-admin context for `/api/admin/*`.
#[derive(Clone, Debug)]
pub struct AdminUser {
    pub id: Uuid,
    pub email: String,
    /// `owner` or `sales`.
    pub role: String,
}

impl AdminUser {
    /// Everything outside the sales CRM is for owners.
    pub fn require_owner(&self) -> Result<(), ApiError> {
        if self.role == "owner" {
            Ok(())
        } else {
            Err(ApiError::forbidden("Owner access required"))
        }
    }
}

/// Admin session cookie → active `super_admins` row.
pub async fn admin_auth(jar: CookieJar, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let token = jar
        .get(ADMIN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(TokenError::Missing)?;

    let claims: AdminClaims = validate_jwt(&token, ADMIN_AUDIENCE).map_err(|e| {
        tracing::warn!("Rejected admin session token: {}", e);
        ApiError::from(e)
    })?;

    let pool = DatabaseManager::pool()?;
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT email, role FROM super_admins WHERE id = $1 AND is_active")
            .bind(claims.sub)
            .fetch_optional(&pool)
            .await?;
    let (email, role) = row.ok_or_else(|| {
        tracing::warn!("Admin session for inactive super admin {}", claims.sub);
        ApiError::unauthorized("Super admin not found or inactive")
    })?;

    request.extensions_mut().insert(AdminUser {
        id: claims.sub,
        email,
        role,
    });
    Ok(next.run(request).await)
}
