mod common;

use chrono::Utc;
use genba_api::auth::{validate_jwt, Claims, TENANT_AUDIENCE};
use genba_api::config;
use genba_api::services::admin_service::AdminLog;
use genba_api::services::ImpersonationService;
use uuid::Uuid;

#[tokio::test]
async fn impersonated_session_expires_early_and_redeems_once() {
    let Some(pool) = common::database().await else { return };
    let org = common::organization(&pool, 10).await;
    let target = common::user(&pool, org, "manager", true).await;
    let (operator,): (Uuid,) = sqlx::query_as(
        "INSERT INTO super_admins (email, name, password_hash) VALUES ($1, 'Support', 'not-a-real-hash') RETURNING id",
    )
    .bind(format!("{}@support.test", Uuid::new_v4().simple()))
    .fetch_one(&pool)
    .await
    .unwrap();

    let service = ImpersonationService::new(pool.clone());
    let issued = service.issue(operator, org, target, AdminLog::default()).await.unwrap();
    let session = service.redeem(&issued.token).await.unwrap();
    assert_eq!(session.super_admin_id, operator);

    let claims: Claims = validate_jwt(&session.token, TENANT_AUDIENCE).unwrap();
    let security = &config::config().security;
    let lifetime = security.impersonation_session_minutes as i64 * 60;
    assert_eq!(claims.exp - claims.iat, lifetime);
    assert!(claims.exp <= Utc::now().timestamp() + lifetime);
    assert!(lifetime < security.session_hours as i64 * 3600);
    assert_eq!(claims.impersonated_by, Some(operator));
    assert_eq!(claims.sub, target);

    let err = service.redeem(&issued.token).await.unwrap_err();
    assert_eq!(err.status_code(), 401);
}
