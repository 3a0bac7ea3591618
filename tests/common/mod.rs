#![allow(dead_code)]

use std::sync::Once;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tower::ServiceExt;
use uuid::Uuid;

pub const CRON_SECRET: &str = "test-cron-secret";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test";

static ENV: Once = Once::new();

/// Configuration is read once per process, so the environment has to be in
/// place before the first request touches it.
pub fn init_env() {
    ENV.call_once(|| {
        std::env::set_var("APP_ENV", "development");
        std::env::set_var("JWT_SECRET", "integration-test-jwt-secret");
        std::env::set_var("CSRF_SECRET", "integration-test-csrf-secret");
        std::env::set_var("CRON_SECRET", CRON_SECRET);
        std::env::set_var("SECURITY_ENABLE_CORS", "false");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", STRIPE_WEBHOOK_SECRET);
    });
}

pub fn app() -> Router {
    init_env();
    genba_api::app()
}

pub async fn send(router: Router, request: Request<Body>) -> Response<Body> {
    router.oneshot(request).await.expect("router is infallible")
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

/// A migrated pool for tests that need Postgres, or `None` when
/// `DATABASE_URL` is not set. Each test gets its own pool because every
/// `#[tokio::test]` runs on its own runtime.
pub async fn database() -> Option<PgPool> {
    init_env();
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("database reachable");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");
    Some(pool)
}

pub async fn organization(pool: &PgPool, max_users: i32) -> Uuid {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO organizations (name, subdomain, max_users) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind("Test Construction")
    .bind(format!("t-{}", Uuid::new_v4().simple()))
    .bind(max_users)
    .fetch_one(pool)
    .await
    .expect("organization inserted");
    id
}

pub async fn user(pool: &PgPool, organization_id: Uuid, role: &str, is_active: bool) -> Uuid {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (organization_id, email, name, password_hash, role, is_active)
        VALUES ($1, $2, $3, 'not-a-real-hash', $4, $5)
        RETURNING id
        "#,
    )
    .bind(organization_id)
    .bind(format!("{}@example.test", Uuid::new_v4().simple()))
    .bind(format!("Test {}", role))
    .bind(role)
    .bind(is_active)
    .fetch_one(pool)
    .await
    .expect("user inserted");
    id
}

pub async fn client(pool: &PgPool, organization_id: Uuid, name: &str) -> Uuid {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO clients (organization_id, client_code, name) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(organization_id)
    .bind(format!("C-{}", &Uuid::new_v4().simple().to_string()[..8]))
    .bind(name)
    .fetch_one(pool)
    .await
    .expect("client inserted");
    id
}
