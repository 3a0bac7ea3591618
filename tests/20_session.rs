mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use uuid::Uuid;

use genba_api::auth::{generate_jwt, AdminClaims};

#[tokio::test]
async fn tenant_api_requires_session() {
    let response = common::send(common::app(), Request::get("/api/tools").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = common::json_body(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_bearer_is_rejected() {
    let request = Request::get("/api/auth/me")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let response = common::send(common::app(), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_token_is_not_a_tenant_session() {
    common::init_env();
    let claims = AdminClaims::new(Uuid::new_v4(), "ops@example.jp".to_string(), "owner".to_string());
    let token = generate_jwt(&claims).unwrap();

    let request = Request::get("/api/auth/me")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = common::send(common::app(), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_api_requires_admin_cookie() {
    let response = common::send(
        common::app(),
        Request::get("/api/admin/organizations").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn document_routes_are_protected_per_kind() {
    for path in ["/api/estimates", "/api/invoices", "/api/purchase-orders"] {
        let response = common::send(common::app(), Request::get(path).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", path);
    }
}
