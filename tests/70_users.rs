mod common;

use genba_api::services::user_service::UserUpdate;
use genba_api::services::UserService;

fn reactivate() -> UserUpdate {
    UserUpdate {
        name: None,
        role: None,
        is_active: Some(true),
        night_shift: None,
    }
}

#[tokio::test]
async fn reactivation_past_the_seat_limit_conflicts() {
    let Some(pool) = common::database().await else { return };
    let org = common::organization(&pool, 2).await;
    let admin = common::user(&pool, org, "admin", true).await;
    common::user(&pool, org, "staff", true).await;
    let dormant = common::user(&pool, org, "staff", false).await;
    let service = UserService::new(pool.clone());

    let err = service.update(org, admin, dormant, reactivate()).await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    let still: (bool,) = sqlx::query_as("SELECT is_active FROM users WHERE id = $1")
        .bind(dormant)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!still.0);
}

#[tokio::test]
async fn reactivation_within_the_limit_succeeds() {
    let Some(pool) = common::database().await else { return };
    let org = common::organization(&pool, 2).await;
    let admin = common::user(&pool, org, "admin", true).await;
    let dormant = common::user(&pool, org, "staff", false).await;
    let service = UserService::new(pool);

    let user = service.update(org, admin, dormant, reactivate()).await.unwrap();
    assert!(user.is_active);
}

#[tokio::test]
async fn racing_reactivations_take_one_seat() {
    let Some(pool) = common::database().await else { return };
    let org = common::organization(&pool, 2).await;
    let admin = common::user(&pool, org, "admin", true).await;
    let first = common::user(&pool, org, "staff", false).await;
    let second = common::user(&pool, org, "staff", false).await;

    let a = UserService::new(pool.clone());
    let b = UserService::new(pool.clone());
    let (x, y) = tokio::join!(
        a.update(org, admin, first, reactivate()),
        b.update(org, admin, second, reactivate()),
    );
    assert_eq!([x.is_ok(), y.is_ok()].iter().filter(|ok| **ok).count(), 1);

    let (active,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE organization_id = $1 AND is_active")
        .bind(org)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(active, 2);
}
