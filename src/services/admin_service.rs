//! Super-admin accounts: login with optional TOTP, 2FA enrolment and the
//! back-office action log.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::two_factor::{self, SecondFactor, TwoFactorError};
use crate::auth::{generate_jwt, hash_password, validate_jwt, verify_password, AdminClaims, TwoFactorChallenge, TWO_FACTOR_AUDIENCE};
use crate::database::models::{SuperAdmin, SuperAdminLog};
use crate::error::ApiError;
use crate::export::qr::qr_svg;
use crate::rate_limit::{Policy, RateLimiter};
use crate::types::{Listing, Page};

use super::user_service::refuse;

/// Request details stored next to an admin action.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminLog<'a> {
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTwoFactorRequest {
    pub challenge_token: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminLogin {
    /// Password accepted and no second factor configured.
    Authenticated {
        #[serde(skip)]
        token: String,
        admin: SuperAdmin,
    },
    /// Password accepted; the client must post a code with this challenge.
    TwoFactorRequired { challenge_token: String },
}

#[derive(Debug, Serialize)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_svg: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub super_admin_id: Option<Uuid>,
    pub action: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub struct AdminService {
    pool: PgPool,
}

impl AdminService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Best effort: a failed log write is reported and never fails the action.
    pub async fn log(&self, super_admin_id: Option<Uuid>, action: &str, details: Value, meta: AdminLog<'_>) {
        let result = sqlx::query(
            r#"
            INSERT INTO super_admin_logs (super_admin_id, action, details, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(super_admin_id)
        .bind(action)
        .bind(&details)
        .bind(meta.ip_address)
        .bind(meta.user_agent)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to write super admin log {}: {}", action, e);
        }
    }

    pub async fn list_logs(&self, query: &LogQuery) -> Result<Listing<SuperAdminLog>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let filter = r#"
            WHERE ($1::uuid IS NULL OR super_admin_id = $1)
              AND ($2::text IS NULL OR action = $2)
        "#;
        let items: Vec<SuperAdminLog> = sqlx::query_as(&format!(
            "SELECT * FROM super_admin_logs {} ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            filter
        ))
        .bind(query.super_admin_id)
        .bind(&query.action)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM super_admin_logs {}", filter))
            .bind(query.super_admin_id)
            .bind(&query.action)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<SuperAdmin, ApiError> {
        sqlx::query_as("SELECT * FROM super_admins WHERE id = $1 AND is_active")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Super admin not found or inactive"))
    }

    async fn session(&self, admin: SuperAdmin, meta: AdminLog<'_>, action: &str) -> Result<AdminLogin, ApiError> {
        sqlx::query("UPDATE super_admins SET last_login_at = now() WHERE id = $1")
            .bind(admin.id)
            .execute(&self.pool)
            .await?;
        let token = generate_jwt(&AdminClaims::new(admin.id, admin.email.clone(), admin.role.clone()))?;
        info!("Super admin {} logged in", admin.id);
        self.log(Some(admin.id), action, json!({}), meta).await;
        Ok(AdminLogin::Authenticated { token, admin })
    }

    /// Password step. Repeated failures lock the account out through the
    /// rate limiter.
    pub async fn login(&self, request: &AdminLoginRequest, meta: AdminLog<'_>) -> Result<AdminLogin, ApiError> {
        let email = request.email.trim().to_lowercase();
        let limiter = RateLimiter::new(self.pool.clone());
        let identifier = format!("admin-login:{}", email);
        let decision = limiter.hit(&identifier, &Policy::login()).await?;
        if !decision.is_allowed() {
            self.log(None, "login_locked", json!({ "email": email }), meta).await;
            return Err(refuse(decision));
        }

        let admin: Option<SuperAdmin> =
            sqlx::query_as("SELECT * FROM super_admins WHERE lower(email) = $1 AND is_active")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;
        let admin = match admin {
            Some(admin) if verify_password(&request.password, &admin.password_hash) => admin,
            other => {
                warn!("Failed super admin login for {}", email);
                self.log(other.map(|a| a.id), "login_failed", json!({ "email": email }), meta).await;
                return Err(ApiError::unauthorized("Invalid email or password"));
            }
        };
        limiter.reset(&identifier).await?;

        if admin.two_factor_enabled {
            let challenge_token = generate_jwt(&TwoFactorChallenge::new(admin.id))?;
            return Ok(AdminLogin::TwoFactorRequired { challenge_token });
        }
        self.session(admin, meta, "login").await
    }

    /// Second step: a TOTP code, or a backup code that is consumed on use.
    pub async fn verify_two_factor(
        &self,
        request: &VerifyTwoFactorRequest,
        meta: AdminLog<'_>,
    ) -> Result<AdminLogin, ApiError> {
        let challenge: TwoFactorChallenge = validate_jwt(&request.challenge_token, TWO_FACTOR_AUDIENCE)?;
        let limiter = RateLimiter::new(self.pool.clone());
        let identifier = format!("admin-2fa:{}", challenge.sub);
        let decision = limiter.hit(&identifier, &Policy::login()).await?;
        if !decision.is_allowed() {
            return Err(refuse(decision));
        }

        let admin = self.fetch(challenge.sub).await?;
        if !admin.two_factor_enabled {
            return Err(TwoFactorError::NotEnabled.into());
        }

        let verified = match SecondFactor::parse(&request.code)? {
            SecondFactor::Totp(code) => {
                let secret = admin
                    .two_factor_secret
                    .as_deref()
                    .ok_or(TwoFactorError::NotEnabled)
                    .and_then(two_factor::decrypt_secret)?;
                match two_factor::verify_totp(&secret, &code) {
                    Ok(step) => self.claim_totp_step(&admin, step).await?,
                    Err(_) => false,
                }
            }
            SecondFactor::BackupCode(code) => self.consume_backup_code(&admin, &code).await?,
        };
        if !verified {
            warn!("Invalid second factor for super admin {}", admin.id);
            self.log(Some(admin.id), "two_factor_failed", json!({}), meta).await;
            return Err(TwoFactorError::InvalidCode.into());
        }

        limiter.reset(&identifier).await?;
        self.session(admin, meta, "login_two_factor").await
    }

    /// Record `step` as used. A code replayed within its window finds the
    /// step already taken and fails.
    async fn claim_totp_step(&self, admin: &SuperAdmin, step: i64) -> Result<bool, ApiError> {
        if !two_factor::step_is_fresh(admin.two_factor_last_step, step) {
            warn!("Super admin {} reused TOTP step {}", admin.id, step);
            return Ok(false);
        }
        let done = sqlx::query(
            r#"
            UPDATE super_admins SET two_factor_last_step = $2
            WHERE id = $1 AND (two_factor_last_step IS NULL OR two_factor_last_step < $2)
            "#,
        )
        .bind(admin.id)
        .bind(step)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    /// Move a matching backup code hash from `backup_codes` to
    /// `used_backup_codes` in one guarded update.
    async fn consume_backup_code(&self, admin: &SuperAdmin, code: &str) -> Result<bool, ApiError> {
        let Some(index) = two_factor::find_backup_code(code, &admin.backup_codes) else {
            return Ok(false);
        };
        let hash = &admin.backup_codes[index];
        let done = sqlx::query(
            r#"
            UPDATE super_admins
            SET backup_codes = array_remove(backup_codes, $2),
                used_backup_codes = array_append(used_backup_codes, $2),
                updated_at = now()
            WHERE id = $1 AND $2 = ANY(backup_codes)
            "#,
        )
        .bind(admin.id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 1 {
            info!(
                "Super admin {} used a backup code, {} left",
                admin.id,
                admin.backup_codes.len() - 1
            );
        }
        Ok(done.rows_affected() == 1)
    }

    /// Generate and store a new (not yet enabled) TOTP secret.
    pub async fn setup_two_factor(&self, admin_id: Uuid) -> Result<TwoFactorSetup, ApiError> {
        let admin = self.fetch(admin_id).await?;
        if admin.two_factor_enabled {
            return Err(ApiError::conflict("Two-factor authentication is already enabled"));
        }
        let secret = two_factor::generate_secret();
        sqlx::query("UPDATE super_admins SET two_factor_secret = $2, updated_at = now() WHERE id = $1")
            .bind(admin_id)
            .bind(two_factor::encrypt_secret(&secret)?)
            .execute(&self.pool)
            .await?;

        let otpauth_url = two_factor::otpauth_url(&secret, &admin.email);
        let qr_svg = qr_svg(&otpauth_url, 200)?;
        Ok(TwoFactorSetup {
            secret,
            otpauth_url,
            qr_svg,
        })
    }

    /// Confirm enrolment with a current code. Returns the backup codes in
    /// clear text; only their hashes are stored.
    pub async fn enable_two_factor(&self, admin_id: Uuid, code: &str, meta: AdminLog<'_>) -> Result<Vec<String>, ApiError> {
        let admin = self.fetch(admin_id).await?;
        if admin.two_factor_enabled {
            return Err(ApiError::conflict("Two-factor authentication is already enabled"));
        }
        let SecondFactor::Totp(code) = SecondFactor::parse(code)? else {
            return Err(ApiError::field("code", "Enter the 6-digit code from your authenticator app"));
        };
        let secret = admin
            .two_factor_secret
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("Run two-factor setup first"))
            .and_then(|s| two_factor::decrypt_secret(s).map_err(ApiError::from))?;
        let step = two_factor::verify_totp(&secret, &code)?;

        let codes = two_factor::generate_backup_codes();
        let hashes: Vec<String> = codes.iter().map(|c| two_factor::hash_backup_code(c)).collect();
        let done = sqlx::query(
            r#"
            UPDATE super_admins
            SET two_factor_enabled = TRUE, backup_codes = $2, used_backup_codes = '{}',
                two_factor_last_step = $3, updated_at = now()
            WHERE id = $1 AND NOT two_factor_enabled
            "#,
        )
        .bind(admin_id)
        .bind(&hashes)
        .bind(step)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(ApiError::conflict("Two-factor authentication is already enabled"));
        }

        info!("Super admin {} enabled two-factor authentication", admin_id);
        self.log(Some(admin_id), "two_factor_enabled", json!({}), meta).await;
        Ok(codes)
    }

    /// Create a back-office account. Used by the CLI.
    pub async fn create_super_admin(&self, email: &str, name: &str, password: &str, role: &str) -> Result<SuperAdmin, ApiError> {
        if !matches!(role, "owner" | "sales") {
            return Err(ApiError::field("role", "Role must be owner or sales"));
        }
        let admin: SuperAdmin = sqlx::query_as(
            r#"
            INSERT INTO super_admins (email, name, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(email.trim().to_lowercase())
        .bind(name)
        .bind(hash_password(password)?)
        .bind(role)
        .fetch_one(&self.pool)
        .await?;
        self.log(Some(admin.id), "super_admin_created", json!({ "email": admin.email }), AdminLog::default())
            .await;
        Ok(admin)
    }
}
