mod common;

use axum::{body::Body, http::Request, http::StatusCode};

#[tokio::test]
async fn cron_without_bearer_is_rejected() {
    let request = Request::post("/api/cron/cleanup").body(Body::empty()).unwrap();
    let response = common::send(common::app(), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cron_with_wrong_secret_is_rejected() {
    let request = Request::post("/api/cron/cleanup")
        .header("authorization", "Bearer not-the-secret")
        .body(Body::empty())
        .unwrap();
    let response = common::send(common::app(), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_job_is_404_once_authorized() {
    let request = Request::post("/api/cron/reindex-everything")
        .header("authorization", format!("Bearer {}", common::CRON_SECRET))
        .body(Body::empty())
        .unwrap();
    let response = common::send(common::app(), request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = common::json_body(response).await;
    assert_eq!(body["success"], false);
}
