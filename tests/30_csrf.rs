mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::from_fn,
    routing::get,
    Router,
};

use genba_api::auth::csrf::{generate_token, CSRF_COOKIE, CSRF_HEADER};
use genba_api::middleware::csrf_guard;

fn guarded() -> Router {
    common::init_env();
    Router::new()
        .route("/thing", get(|| async { "read" }).post(|| async { "written" }))
        .layer(from_fn(csrf_guard))
}

#[tokio::test]
async fn reads_skip_the_check() {
    let response = common::send(guarded(), Request::get("/thing").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn writes_without_token_are_forbidden() {
    let response = common::send(guarded(), Request::post("/thing").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = common::json_body(response).await;
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn matching_cookie_and_header_pass() {
    let token = generate_token().unwrap();
    let request = Request::post("/thing")
        .header("cookie", format!("{}={}", CSRF_COOKIE, token))
        .header(CSRF_HEADER, &token)
        .body(Body::empty())
        .unwrap();
    let response = common::send(guarded(), request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mismatched_header_is_forbidden() {
    let token = generate_token().unwrap();
    let other = generate_token().unwrap();
    let request = Request::post("/thing")
        .header("cookie", format!("{}={}", CSRF_COOKIE, token))
        .header(CSRF_HEADER, other)
        .body(Body::empty())
        .unwrap();
    let response = common::send(guarded(), request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
