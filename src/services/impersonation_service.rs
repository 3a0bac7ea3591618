//! Issue and redeem single-use impersonation tokens.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{generate_jwt, impersonation, TokenError};
use crate::config;
use crate::database::models::User;
use crate::error::ApiError;
use crate::types::Role;

use super::admin_service::{AdminLog, AdminService};

#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Link the operator opens to start the impersonated session.
    pub url: String,
}

/// Tenant session created by redeeming a token.
#[derive(Debug)]
pub struct ImpersonatedSession {
    pub token: String,
    pub user: User,
    pub super_admin_id: Uuid,
}

pub struct ImpersonationService {
    pool: PgPool,
}

impl ImpersonationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn issue(
        &self,
        super_admin_id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
        meta: AdminLog<'_>,
    ) -> Result<IssuedToken, ApiError> {
        let user: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT u.id FROM users u
            JOIN organizations o ON o.id = u.organization_id
            WHERE u.id = $1 AND u.organization_id = $2
              AND u.is_active AND u.deleted_at IS NULL AND o.deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        if user.is_none() {
            return Err(ApiError::not_found("Active user not found in this organization"));
        }

        let ttl = Duration::minutes(config::config().security.impersonation_ttl_minutes as i64);
        let (claims, token) = impersonation::issue(super_admin_id, organization_id, user_id, ttl)?;

        sqlx::query(
            r#"
            INSERT INTO impersonation_tokens (jti, super_admin_id, organization_id, user_id, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(claims.jti)
        .bind(super_admin_id)
        .bind(organization_id)
        .bind(user_id)
        .bind(claims.expires_at())
        .execute(&self.pool)
        .await?;

        info!(
            "Super admin {} issued impersonation token for user {} in org {}",
            super_admin_id, user_id, organization_id
        );
        AdminService::new(self.pool.clone())
            .log(
                Some(super_admin_id),
                "impersonation_issued",
                json!({ "organization_id": organization_id, "user_id": user_id, "jti": claims.jti }),
                meta,
            )
            .await;

        let url = format!(
            "{}/auth/impersonate?token={}",
            config::config().api.public_url.trim_end_matches('/'),
            token
        );
        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            url,
        })
    }

    /// Verify the token and burn its `jti`. A token redeems at most once.
    pub async fn redeem(&self, token: &str) -> Result<ImpersonatedSession, ApiError> {
        let claims = impersonation::verify(token)?;

        let burned = sqlx::query(
            r#"
            UPDATE impersonation_tokens SET used_at = now()
            WHERE jti = $1 AND used_at IS NULL AND expires_at > now()
            "#,
        )
        .bind(claims.jti)
        .execute(&self.pool)
        .await?;
        if burned.rows_affected() == 0 {
            warn!("Rejected reuse of impersonation token {}", claims.jti);
            return Err(TokenError::AlreadyUsed.into());
        }

        let user: User = sqlx::query_as(
            r#"
            SELECT * FROM users
            WHERE id = $1 AND organization_id = $2 AND is_active AND deleted_at IS NULL
            "#,
        )
        .bind(claims.user)
        .bind(claims.org)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Impersonated user is no longer active"))?;

        let role: Role = user.role.parse().map_err(ApiError::internal_server_error)?;
        let session = impersonation::session_for(&claims, role);
        let token = generate_jwt(&session)?;

        info!("Super admin {} is now acting as user {}", claims.sub, user.id);
        AdminService::new(self.pool.clone())
            .log(
                Some(claims.sub),
                "impersonation_redeemed",
                json!({ "organization_id": user.organization_id, "user_id": user.id, "jti": claims.jti }),
                AdminLog::default(),
            )
            .await;

        Ok(ImpersonatedSession {
            token,
            user,
            super_admin_id: claims.sub,
        })
    }

    /// Drop tokens that expired more than a day ago.
    pub async fn purge_expired(&self) -> Result<u64, ApiError> {
        let done = sqlx::query("DELETE FROM impersonation_tokens WHERE expires_at < now() - interval '1 day'")
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}
