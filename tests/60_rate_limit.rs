mod common;

use chrono::Duration;
use genba_api::rate_limit::{Policy, RateLimiter};
use uuid::Uuid;

#[tokio::test]
async fn concurrent_hits_never_exceed_the_limit() {
    let Some(pool) = common::database().await else { return };
    let policy = Policy {
        limit: 5,
        window: Duration::minutes(15),
        block: Duration::minutes(30),
    };
    let identifier = format!("login:{}", Uuid::new_v4());

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let limiter = RateLimiter::new(pool.clone());
            let identifier = identifier.clone();
            tokio::spawn(async move { limiter.hit(&identifier, &policy).await })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_allowed() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 5);

    // Counting stops once the block starts, just past twice the limit.
    let (count, blocked): (i32, bool) =
        sqlx::query_as("SELECT count, blocked_until IS NOT NULL FROM rate_limits WHERE identifier = $1")
            .bind(&identifier)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 11);
    assert!(blocked);
}

#[tokio::test]
async fn reset_clears_the_window() {
    let Some(pool) = common::database().await else { return };
    let policy = Policy {
        limit: 1,
        window: Duration::minutes(15),
        block: Duration::minutes(30),
    };
    let identifier = format!("login:{}", Uuid::new_v4());
    let limiter = RateLimiter::new(pool);

    assert!(limiter.hit(&identifier, &policy).await.unwrap().is_allowed());
    assert!(!limiter.hit(&identifier, &policy).await.unwrap().is_allowed());
    limiter.reset(&identifier).await.unwrap();
    assert!(limiter.hit(&identifier, &policy).await.unwrap().is_allowed());
}
