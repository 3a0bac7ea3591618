use axum::{extract::Request, middleware::Next, response::Response};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::services::attendance_service::Worker;
use crate::types::Role;
use crate::workflow::Actor;

use super::auth::AuthUser;

/// Tenant user as currently stored, not as the token remembers it.
#[derive(Clone, Debug)]
pub struct ValidatedUser {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub night_shift: bool,
    pub impersonated_by: Option<Uuid>,
}

impl ValidatedUser {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id,
            role: self.role,
        }
    }

    pub fn worker(&self) -> Worker {
        Worker {
            user_id: self.id,
            role: self.role,
            night_shift: self.night_shift,
        }
    }

    /// 403 unless the user holds at least `min`.
    pub fn require(&self, min: Role) -> Result<(), ApiError> {
        if self.role.at_least(min) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("This action requires the {} role or above", min)))
        }
    }

    /// 403 unless the session was opened by a back-office operator.
    pub fn require_impersonation(&self) -> Result<(), ApiError> {
        match self.impersonated_by {
            Some(_) => Ok(()),
            None => Err(ApiError::forbidden("Only support staff acting for this organization may do this")),
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    email: String,
    role: String,
    night_shift: bool,
}

/// Ensure the session's user still exists, is active and belongs to an active
/// organization. The role is refreshed from the database.
pub async fn validate_user(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("Authentication required before user validation"))?;

    let pool = DatabaseManager::pool()?;
    let row: Option<UserRow> = sqlx::query_as(
        r#"
        SELECT u.id, u.organization_id, u.name, u.email, u.role, u.night_shift
        FROM users u
        JOIN organizations o ON o.id = u.organization_id
        WHERE u.id = $1 AND u.organization_id = $2
          AND u.is_active AND u.deleted_at IS NULL
          AND o.is_active AND o.deleted_at IS NULL
        "#,
    )
    .bind(auth_user.user_id)
    .bind(auth_user.organization_id)
    .fetch_optional(&pool)
    .await?;

    let row = row.ok_or_else(|| {
        tracing::warn!(
            "User validation failed: user {} not active in org {}",
            auth_user.user_id,
            auth_user.organization_id
        );
        ApiError::unauthorized("Account is inactive or no longer exists")
    })?;

    let role: Role = row.role.parse().map_err(|e: String| {
        tracing::error!("User {} has unknown role: {}", row.id, e);
        ApiError::forbidden("Account role is not recognised")
    })?;
    if role != auth_user.role {
        tracing::debug!("Role of user {} changed from {} to {}", row.id, auth_user.role, role);
    }

    request.extensions_mut().insert(ValidatedUser {
        id: row.id,
        organization_id: row.organization_id,
        name: row.name,
        email: row.email,
        role,
        night_shift: row.night_shift,
        impersonated_by: auth_user.impersonated_by,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> ValidatedUser {
        ValidatedUser {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "Sato".to_string(),
            email: "sato@example.jp".to_string(),
            role,
            night_shift: false,
            impersonated_by: None,
        }
    }

    #[test]
    fn require_checks_role_floor() {
        assert!(user(Role::Manager).require(Role::Leader).is_ok());
        assert_eq!(user(Role::Staff).require(Role::Manager).unwrap_err().status_code(), 403);
    }

    #[test]
    fn bulk_import_needs_an_operator_session() {
        let admin = user(Role::Admin);
        assert_eq!(admin.require_impersonation().unwrap_err().status_code(), 403);

        let operated = ValidatedUser {
            impersonated_by: Some(Uuid::new_v4()),
            ..admin
        };
        assert!(operated.require_impersonation().is_ok());
    }
}
