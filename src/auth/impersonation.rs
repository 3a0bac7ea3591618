//! Signed, single-use impersonation tokens.
//!
//! The JWT carries a `jti` that is persisted with `used_at = NULL` when the
//! token is issued. Redemption verifies the signature and expiry here and then
//! burns the `jti` with one guarded update (see `services::impersonation_service`).

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config;
use crate::types::Role;

use super::{generate_jwt, validate_jwt, Claims, TokenError};

pub const IMPERSONATION_AUDIENCE: &str = "impersonation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonationClaims {
    pub jti: Uuid,
    /// Issuing super admin.
    pub sub: Uuid,
    pub org: Uuid,
    /// Tenant user being impersonated.
    pub user: Uuid,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

impl ImpersonationClaims {
    pub fn new(super_admin_id: Uuid, organization_id: Uuid, user_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            jti: Uuid::new_v4(),
            sub: super_admin_id,
            org: organization_id,
            user: user_id,
            aud: IMPERSONATION_AUDIENCE.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

/// Sign a fresh impersonation token. The caller persists `claims.jti`.
pub fn issue(
    super_admin_id: Uuid,
    organization_id: Uuid,
    user_id: Uuid,
    ttl: Duration,
) -> Result<(ImpersonationClaims, String), TokenError> {
    let claims = ImpersonationClaims::new(super_admin_id, organization_id, user_id, ttl);
    let token = generate_jwt(&claims)?;
    Ok((claims, token))
}

/// Tenant session started by redeeming `claims`. It is marked with the
/// issuing super admin and lasts `impersonation_session_minutes`, not the
/// regular session length.
pub fn session_for(claims: &ImpersonationClaims, role: Role) -> Claims {
    let minutes = config::config().security.impersonation_session_minutes as i64;
    Claims::with_ttl(claims.user, claims.org, role, Duration::minutes(minutes)).impersonated(claims.sub)
}

/// Signature, audience and expiry check. Single-use is enforced by the store.
pub fn verify(token: &str) -> Result<ImpersonationClaims, TokenError> {
    if token.trim().is_empty() {
        return Err(TokenError::Missing);
    }
    validate_jwt(token, IMPERSONATION_AUDIENCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TENANT_AUDIENCE;

    #[test]
    fn issued_token_verifies() {
        let (claims, token) = issue(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Duration::minutes(10)).unwrap();
        let verified = verify(&token).unwrap();
        assert_eq!(verified.jti, claims.jti);
        assert_eq!(verified.user, claims.user);
        assert!(verified.expires_at() > Utc::now());
    }

    #[test]
    fn expired_impersonation_token_is_rejected() {
        let (_, token) = issue(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Duration::seconds(-30)).unwrap();
        assert_eq!(verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn session_token_cannot_be_redeemed() {
        let session = generate_jwt(&Claims::new(Uuid::new_v4(), Uuid::new_v4(), Role::Admin)).unwrap();
        assert_eq!(verify(&session).unwrap_err(), TokenError::WrongAudience);
    }

    #[test]
    fn impersonation_token_is_not_a_session() {
        let (_, token) = issue(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Duration::minutes(10)).unwrap();
        assert_eq!(
            validate_jwt::<Claims>(&token, TENANT_AUDIENCE).unwrap_err(),
            TokenError::WrongAudience
        );
    }

    #[test]
    fn redeemed_session_is_short_lived() {
        let admin = Uuid::new_v4();
        let claims = ImpersonationClaims::new(admin, Uuid::new_v4(), Uuid::new_v4(), Duration::minutes(10));
        let session = session_for(&claims, Role::Manager);

        let security = &config::config().security;
        assert_eq!(session.exp - session.iat, security.impersonation_session_minutes as i64 * 60);
        assert!(session.exp - session.iat < security.session_hours as i64 * 3600);
        assert_eq!(session.impersonated_by, Some(admin));
        assert_eq!(session.sub, claims.user);
        assert_eq!(session.org, claims.org);
    }

    #[test]
    fn blank_token_is_missing() {
        assert_eq!(verify("  ").unwrap_err(), TokenError::Missing);
    }
}
