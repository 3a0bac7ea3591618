use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::types::Role;

pub mod csrf;
pub mod impersonation;
pub mod two_factor;

/// Audience of tenant session tokens.
pub const TENANT_AUDIENCE: &str = "tenant";
/// Audience of super-admin session tokens.
pub const ADMIN_AUDIENCE: &str = "admin";
/// Audience of the short-lived token between password and 2FA steps.
pub const TWO_FACTOR_AUDIENCE: &str = "admin-2fa";

/// Tenant session cookie.
pub const SESSION_COOKIE: &str = "genba_session";
/// Super-admin session cookie.
pub const ADMIN_COOKIE: &str = "genba_admin_session";

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("Authentication token missing")]
    Missing,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid for this endpoint")]
    WrongAudience,

    #[error("Token has already been used or revoked")]
    AlreadyUsed,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Tenant user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub org: Uuid,
    pub role: Role,
    /// Super admin acting as this user, when the session came from impersonation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<Uuid>,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, organization_id: Uuid, role: Role) -> Self {
        let hours = config::config().security.session_hours as i64;
        Self::with_ttl(user_id, organization_id, role, Duration::hours(hours))
    }

    pub fn with_ttl(user_id: Uuid, organization_id: Uuid, role: Role, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            org: organization_id,
            role,
            impersonated_by: None,
            aud: TENANT_AUDIENCE.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn impersonated(mut self, super_admin_id: Uuid) -> Self {
        self.impersonated_by = Some(super_admin_id);
        self
    }
}

/// Super-admin session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

impl AdminClaims {
    pub fn new(super_admin_id: Uuid, email: String, role: String) -> Self {
        let now = Utc::now();
        let hours = config::config().security.admin_session_hours as i64;
        Self {
            sub: super_admin_id,
            email,
            role,
            aud: ADMIN_AUDIENCE.to_string(),
            exp: (now + Duration::hours(hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

/// Proof that the password step of admin login succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorChallenge {
    pub sub: Uuid,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

impl TwoFactorChallenge {
    pub fn new(super_admin_id: Uuid) -> Self {
        let now = Utc::now();
        let minutes = config::config().security.two_factor_challenge_minutes as i64;
        Self {
            sub: super_admin_id,
            aud: TWO_FACTOR_AUDIENCE.to_string(),
            exp: (now + Duration::minutes(minutes)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

pub fn generate_jwt<T: Serialize>(claims: &T) -> Result<String, TokenError> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err(TokenError::Signing("JWT secret not configured".to_string()));
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| TokenError::Signing(e.to_string()))
}

/// Verify signature, expiry and audience, returning the claims.
pub fn validate_jwt<T: DeserializeOwned>(token: &str, audience: &str) -> Result<T, TokenError> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err(TokenError::Signing("JWT secret not configured".to_string()));
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    validation.leeway = 0;

    decode::<T>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidAudience => TokenError::WrongAudience,
            _ => TokenError::Invalid(e.to_string()),
        })
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

/// Constant-time bcrypt comparison. Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_token_round_trips_with_role() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), Role::Leader);
        let token = generate_jwt(&claims).unwrap();
        let decoded: Claims = validate_jwt(&token, TENANT_AUDIENCE).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.role, Role::Leader);
        assert!(decoded.impersonated_by.is_none());
    }

    #[test]
    fn admin_token_is_not_a_tenant_session() {
        let claims = AdminClaims::new(Uuid::new_v4(), "ops@example.com".into(), "owner".into());
        let token = generate_jwt(&claims).unwrap();
        let err = validate_jwt::<Claims>(&token, TENANT_AUDIENCE).unwrap_err();
        assert_eq!(err, TokenError::WrongAudience);
    }

    #[test]
    fn expired_session_is_rejected() {
        let claims = Claims::with_ttl(Uuid::new_v4(), Uuid::new_v4(), Role::Staff, Duration::minutes(-5));
        let token = generate_jwt(&claims).unwrap();
        assert_eq!(validate_jwt::<Claims>(&token, TENANT_AUDIENCE).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), Role::Staff);
        let mut token = generate_jwt(&claims).unwrap();
        token.push('x');
        assert!(matches!(
            validate_jwt::<Claims>(&token, TENANT_AUDIENCE),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = bcrypt::hash("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
