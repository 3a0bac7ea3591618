//! Forgotten-password reset links and confirmed password changes.
//!
//! Tokens are single use and stored only as SHA-256 hashes. Redeeming one
//! is a guarded UPDATE, so two requests with the same token cannot both win.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::config;
use crate::error::ApiError;
use crate::mail::{mailer_from_config, Email, Mailer};
use crate::rate_limit::{Policy, RateLimiter};

use super::audit_service::{AuditEntry, AuditService};
use super::user_service::{check_password, refuse};

const RESET_TTL_MINUTES: i64 = 60;
const CHANGE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Reset,
    Change,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Reset => "reset",
            Purpose::Change => "change",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            Purpose::Reset => Duration::minutes(RESET_TTL_MINUTES),
            Purpose::Change => Duration::minutes(CHANGE_TTL_MINUTES),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPassword {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPassword {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RequestChange {
    pub current_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmChange {
    pub code: String,
    pub new_password: String,
}

/// 32 random bytes, hex encoded, for a reset link.
pub fn generate_reset_token() -> String {
    hex::encode(rand::thread_rng().gen::<[u8; 32]>())
}

/// Six digits, zero padded, mailed to confirm a change.
pub fn generate_change_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

fn reset_link(token: &str) -> String {
    format!("{}/reset-password?token={}", config::config().api.public_url, token)
}

#[derive(FromRow)]
struct Account {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    name: String,
    password_hash: String,
}

pub struct PasswordService {
    pool: PgPool,
    mailer: Arc<dyn Mailer>,
}

impl PasswordService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            mailer: mailer_from_config(),
        }
    }

    async fn account(&self, user_id: Uuid) -> Result<Account, ApiError> {
        sqlx::query_as(
            "SELECT id, organization_id, email, name, password_hash FROM users WHERE id = $1 AND deleted_at IS NULL AND is_active",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Store a fresh token, retiring older unused ones of the same purpose.
    async fn issue(&self, user_id: Uuid, purpose: Purpose, token: &str) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE password_tokens SET used_at = now() WHERE user_id = $1 AND purpose = $2 AND used_at IS NULL")
            .bind(user_id)
            .bind(purpose.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO password_tokens (user_id, purpose, token_hash, expires_at) VALUES ($1, $2, $3, $4)")
            .bind(user_id)
            .bind(purpose.as_str())
            .bind(hash_token(token))
            .bind(Utc::now() + purpose.ttl())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn send(&self, email: Email) {
        if let Err(e) = self.mailer.send(&email).await {
            error!("Password email '{}' failed: {}", email.subject, e);
        }
    }

    /// Mail a reset link when the address belongs to an active user.
    /// Callers answer the same way whether or not it does.
    pub async fn forgot(&self, request: &ForgotPassword, ip: &str) -> Result<(), ApiError> {
        let email = request.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(ApiError::field("email", "Email is required"));
        }
        let decision = RateLimiter::new(self.pool.clone())
            .hit(&format!("password-reset:{}", ip), &Policy::login())
            .await?;
        if !decision.is_allowed() {
            return Err(refuse(decision));
        }

        let account: Option<Account> = sqlx::query_as(
            r#"
            SELECT u.id, u.organization_id, u.email, u.name, u.password_hash FROM users u
            JOIN organizations o ON o.id = u.organization_id
            WHERE lower(u.email) = $1 AND u.deleted_at IS NULL AND u.is_active AND o.is_active
            "#,
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;
        let Some(account) = account else {
            warn!("Password reset requested for unknown address from {}", ip);
            return Ok(());
        };

        let token = generate_reset_token();
        self.issue(account.id, Purpose::Reset, &token).await?;
        info!("Password reset link issued to user {}", account.id);
        self.send(Email::new(
            account.email,
            "Reset your password",
            format!(
                "Hello {},\n\nOpen this link within {} minutes to choose a new password:\n{}\n\nIf you did not ask for this, ignore this email.",
                account.name,
                RESET_TTL_MINUTES,
                reset_link(&token)
            ),
        ))
        .await;
        Ok(())
    }

    /// Burn an unexpired token and return whose it was.
    async fn redeem(&self, purpose: Purpose, token: &str, user_id: Option<Uuid>) -> Result<Option<Uuid>, ApiError> {
        let redeemed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE password_tokens SET used_at = now()
            WHERE purpose = $1 AND token_hash = $2 AND used_at IS NULL AND expires_at > now()
              AND ($3::uuid IS NULL OR user_id = $3)
            RETURNING user_id
            "#,
        )
        .bind(purpose.as_str())
        .bind(hash_token(token))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(redeemed.map(|(id,)| id))
    }

    async fn set_password(&self, account: &Account, password: &str, action: &str) -> Result<(), ApiError> {
        let password_hash = hash_password(password)?;
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(account.id)
            .bind(&password_hash)
            .execute(&self.pool)
            .await?;
        info!("Password of user {} changed ({})", account.id, action);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(account.organization_id, account.id, action, "user")
                    .entity(account.id)
                    .change(None, Some(json!({ "email": account.email }))),
            )
            .await;
        self.send(Email::new(
            account.email.clone(),
            "Your password was changed",
            format!(
                "Hello {},\n\nThe password of your account was just changed. If this was not you, contact your administrator.",
                account.name
            ),
        ))
        .await;
        Ok(())
    }

    pub async fn reset(&self, request: &ResetPassword) -> Result<(), ApiError> {
        check_password(&request.password)?;
        let user_id = self
            .redeem(Purpose::Reset, &request.token, None)
            .await?
            .ok_or_else(|| ApiError::bad_request("This reset link is invalid or has expired"))?;
        let account = self.account(user_id).await?;
        self.set_password(&account, &request.password, "password_reset").await
    }

    /// Check the current password and mail a confirmation code.
    pub async fn request_change(&self, user_id: Uuid, request: &RequestChange) -> Result<(), ApiError> {
        let account = self.account(user_id).await?;
        if !verify_password(&request.current_password, &account.password_hash) {
            return Err(ApiError::field("current_password", "Current password is incorrect"));
        }

        let code = generate_change_code();
        self.issue(account.id, Purpose::Change, &code).await?;
        self.send(Email::new(
            account.email.clone(),
            "Confirm your password change",
            format!(
                "Hello {},\n\nYour confirmation code is {}. It is valid for {} minutes.",
                account.name, code, CHANGE_TTL_MINUTES
            ),
        ))
        .await;
        Ok(())
    }

    /// Six digits are guessable, so attempts share the login rate limit.
    pub async fn confirm_change(&self, user_id: Uuid, request: &ConfirmChange) -> Result<(), ApiError> {
        check_password(&request.new_password)?;
        let limiter = RateLimiter::new(self.pool.clone());
        let identifier = format!("password-change:{}", user_id);
        let decision = limiter.hit(&identifier, &Policy::login()).await?;
        if !decision.is_allowed() {
            return Err(refuse(decision));
        }

        self.redeem(Purpose::Change, &request.code, Some(user_id))
            .await?
            .ok_or_else(|| ApiError::field("code", "The confirmation code is incorrect or has expired"))?;
        limiter.reset(&identifier).await?;
        let account = self.account(user_id).await?;
        self.set_password(&account, &request.new_password, "password_change").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_tokens_are_long_and_unique() {
        let (a, b) = (generate_reset_token(), generate_reset_token());
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn change_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_change_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn tokens_are_stored_hashed() {
        let token = generate_reset_token();
        let stored = hash_token(&token);
        assert_ne!(stored, token);
        assert_eq!(stored, hash_token(&format!(" {} ", token)));
        assert_ne!(stored, hash_token(&generate_reset_token()));
    }

    #[test]
    fn change_codes_expire_sooner_than_reset_links() {
        assert!(Purpose::Change.ttl() < Purpose::Reset.ttl());
        assert_eq!(Purpose::Reset.ttl(), Duration::hours(1));
    }
}
