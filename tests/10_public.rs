mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn root_uses_success_envelope() {
    let response = common::send(common::app(), Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["name"], "Genba API");
}

#[tokio::test]
async fn health_answers_even_without_database() {
    let response = common::send(common::app(), Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::json_body(response).await;
    assert_eq!(body["success"], true);
    assert!(body["data"]["status"].is_string());
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let response = common::send(common::app(), Request::get("/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = common::json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn login_requires_credentials() {
    let request = Request::post("/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"email":"  ","password":""}"#))
        .unwrap();
    let response = common::send(common::app(), request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn csrf_endpoint_sets_cookie() {
    let response = common::send(common::app(), Request::get("/auth/csrf").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("csrf_token="), "unexpected cookie: {}", cookie);

    let body = common::json_body(response).await;
    let token = body["data"]["token"].as_str().unwrap();
    assert!(cookie.contains(token));
}

#[tokio::test]
async fn stripe_webhook_requires_signature() {
    let request = Request::post("/api/webhooks/stripe")
        .body(Body::from(r#"{"id":"evt_1"}"#))
        .unwrap();
    let response = common::send(common::app(), request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
