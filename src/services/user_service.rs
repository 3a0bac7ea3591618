//! Tenant users: password login and member management.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{generate_jwt, hash_password, verify_password, Claims};
use crate::database::models::User;
use crate::error::ApiError;
use crate::rate_limit::{Decision, Policy, RateLimiter};
use crate::types::{Listing, Page, Role};

use super::audit_service::{AuditEntry, AuditService};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::field(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Signed session plus the user it belongs to.
#[derive(Debug, Serialize)]
pub struct Session {
    pub token: String,
    pub expires_at: i64,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub night_shift: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub night_shift: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Rate-limit key for login attempts: per address and per account.
pub fn login_identifier(ip: &str, email: &str) -> String {
    format!("login:{}:{}", ip, email.trim().to_lowercase())
}

pub(crate) fn refuse(decision: Decision) -> ApiError {
    ApiError::too_many_requests(format!(
        "Too many login attempts. Try again in {} seconds",
        decision.retry_after_secs(Utc::now())
    ))
}

/// Whether an update turns an inactive member active.
pub fn needs_seat(currently_active: bool, requested: Option<bool>) -> bool {
    !currently_active && requested == Some(true)
}

fn seat_limit_reached() -> ApiError {
    ApiError::conflict("User limit of the current plan reached")
}

/// Serialize seat changes within one organization for the rest of `tx`.
async fn lock_seats(tx: &mut Transaction<'_, Postgres>, organization_id: Uuid) -> Result<(), ApiError> {
    sqlx::query("SELECT 1 FROM organizations WHERE id = $1 FOR UPDATE")
        .bind(organization_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization not found"))?;
    Ok(())
}

pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Email/password login. Unknown email, wrong password and inactive
    /// accounts all answer with the same 401.
    pub async fn login(&self, request: &LoginRequest, ip: &str) -> Result<Session, ApiError> {
        let email = request.email.trim().to_lowercase();
        if email.is_empty() || request.password.is_empty() {
            return Err(ApiError::bad_request("Email and password are required"));
        }

        let limiter = RateLimiter::new(self.pool.clone());
        let identifier = login_identifier(ip, &email);
        let decision = limiter.hit(&identifier, &Policy::login()).await?;
        if !decision.is_allowed() {
            return Err(refuse(decision));
        }

        let user: Option<User> = sqlx::query_as(
            r#"
            SELECT u.* FROM users u
            JOIN organizations o ON o.id = u.organization_id
            WHERE lower(u.email) = $1 AND u.deleted_at IS NULL
              AND u.is_active AND o.is_active AND o.deleted_at IS NULL
            "#,
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let user = match user {
            Some(user) if verify_password(&request.password, &user.password_hash) => user,
            _ => {
                warn!("Failed login for {} from {}", email, ip);
                return Err(ApiError::unauthorized("Invalid email or password"));
            }
        };

        limiter.reset(&identifier).await?;
        sqlx::query("UPDATE users SET last_login_at = now() WHERE id = $1")
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        let role: Role = user.role.parse().map_err(ApiError::internal_server_error)?;
        let claims = Claims::new(user.id, user.organization_id, role);
        let token = generate_jwt(&claims)?;
        info!("User {} logged in to org {}", user.id, user.organization_id);

        Ok(Session {
            token,
            expires_at: claims.exp,
            user,
        })
    }

    pub async fn fetch(&self, organization_id: Uuid, id: Uuid) -> Result<User, ApiError> {
        sqlx::query_as("SELECT * FROM users WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    pub async fn list(&self, organization_id: Uuid, query: &UserQuery) -> Result<Listing<User>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let role = query.role.map(|r| r.as_str());

        let filter = r#"
            WHERE organization_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR role = $2)
              AND ($3::bool IS NULL OR is_active = $3)
        "#;
        let items: Vec<User> = sqlx::query_as(&format!(
            "SELECT * FROM users {} ORDER BY name LIMIT $4 OFFSET $5",
            filter
        ))
        .bind(organization_id)
        .bind(role)
        .bind(query.active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM users {}", filter))
            .bind(organization_id)
            .bind(role)
            .bind(query.active)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    /// Add a member. Active seats are capped by the organization's `max_users`.
    pub async fn create(&self, organization_id: Uuid, actor_id: Uuid, input: NewUser) -> Result<User, ApiError> {
        let email = input.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(ApiError::field("email", "Invalid email address"));
        }
        if input.name.trim().is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        check_password(&input.password)?;
        let password_hash = hash_password(&input.password)?;

        let mut tx = self.pool.begin().await?;
        lock_seats(&mut tx, organization_id).await?;
        let user: User = sqlx::query_as(
            r#"
            INSERT INTO users (organization_id, email, name, password_hash, role, night_shift)
            SELECT $1, $2, $3, $4, $5, $6
            FROM organizations o
            WHERE o.id = $1
              AND (SELECT COUNT(*) FROM users WHERE organization_id = $1 AND is_active AND deleted_at IS NULL) < o.max_users
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(&email)
        .bind(input.name.trim())
        .bind(&password_hash)
        .bind(input.role.as_str())
        .bind(input.night_shift)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::field("email", "Email is already registered")
            }
            other => other.into(),
        })?
        .ok_or_else(seat_limit_reached)?;
        tx.commit().await?;

        info!("User {} added to org {} as {}", user.id, organization_id, user.role);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor_id, "create", "user")
                    .entity(user.id)
                    .change(None, Some(json!({ "email": user.email, "role": user.role }))),
            )
            .await;
        Ok(user)
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        actor_id: Uuid,
        id: Uuid,
        input: UserUpdate,
    ) -> Result<User, ApiError> {
        let before = self.fetch(organization_id, id).await?;
        if id == actor_id && (input.role.is_some() || input.is_active == Some(false)) {
            return Err(ApiError::bad_request("You cannot change your own role or deactivate yourself"));
        }
        if let Some(name) = &input.name {
            if name.trim().is_empty() {
                return Err(ApiError::field("name", "Name is required"));
            }
        }

        // Reactivating takes a seat, so it is held to the same cap as `create`.
        let mut tx = self.pool.begin().await?;
        let takes_seat = needs_seat(before.is_active, input.is_active);
        if takes_seat {
            lock_seats(&mut tx, organization_id).await?;
        }
        let user: User = sqlx::query_as(
            r#"
            UPDATE users u SET
                name = COALESCE($3, u.name),
                role = COALESCE($4, u.role),
                is_active = COALESCE($5, u.is_active),
                night_shift = COALESCE($6, u.night_shift),
                updated_at = now()
            WHERE u.id = $1 AND u.organization_id = $2 AND u.deleted_at IS NULL
              AND (
                  NOT $7 OR u.is_active
                  OR (SELECT COUNT(*) FROM users WHERE organization_id = $2 AND is_active AND deleted_at IS NULL)
                     < (SELECT max_users FROM organizations WHERE id = $2)
              )
            RETURNING u.*
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(input.name.as_deref().map(str::trim))
        .bind(input.role.map(|r| r.as_str()))
        .bind(input.is_active)
        .bind(input.night_shift)
        .bind(takes_seat)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            if takes_seat {
                seat_limit_reached()
            } else {
                ApiError::not_found("User not found")
            }
        })?;
        tx.commit().await?;

        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, actor_id, "update", "user").entity(id).change(
                    Some(json!({ "role": before.role, "is_active": before.is_active, "night_shift": before.night_shift })),
                    Some(json!({ "role": user.role, "is_active": user.is_active, "night_shift": user.night_shift })),
                ),
            )
            .await;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_identifier_normalizes_email() {
        assert_eq!(
            login_identifier("203.0.113.9", " Tanaka@Example.JP "),
            "login:203.0.113.9:tanaka@example.jp"
        );
    }

    #[test]
    fn only_reactivation_takes_a_seat() {
        assert!(needs_seat(false, Some(true)));
        assert!(!needs_seat(true, Some(true)));
        assert!(!needs_seat(false, None));
        assert!(!needs_seat(true, Some(false)));
        assert_eq!(seat_limit_reached().status_code(), 409);
    }

    #[test]
    fn refusal_is_429_with_retry_hint() {
        let err = refuse(Decision::Limited { retry_after_secs: 42 });
        assert_eq!(err.status_code(), 429);
        assert!(err.message().contains("42 seconds"));
    }
}
