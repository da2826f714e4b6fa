use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::helpers::make_test_app;
use db::models::user::Model as UserModel;

fn login_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn login_returns_token_for_valid_credentials() {
    let (app, state, _qr) = make_test_app().await;
    UserModel::create(&state.db_clone(), "alice", "alice@test.com", "password1", false)
        .await
        .unwrap();

    let response = app
        .oneshot(login_request(
            json!({ "username": "alice", "password": "password1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["username"], "alice");
    assert!(!body["data"]["token"].as_str().unwrap_or_default().is_empty());
    // The password hash must never leak through the envelope.
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn login_rejects_wrong_password_and_unknown_user_identically() {
    let (app, state, _qr) = make_test_app().await;
    UserModel::create(&state.db_clone(), "bob", "bob@test.com", "password1", false)
        .await
        .unwrap();

    let wrong_pass = app
        .clone()
        .oneshot(login_request(
            json!({ "username": "bob", "password": "nope" }),
        ))
        .await
        .unwrap();
    let unknown = app
        .oneshot(login_request(
            json!({ "username": "nobody", "password": "nope" }),
        ))
        .await
        .unwrap();

    assert_eq!(wrong_pass.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

    let b1 = axum::body::to_bytes(wrong_pass.into_body(), usize::MAX)
        .await
        .unwrap();
    let b2 = axum::body::to_bytes(unknown.into_body(), usize::MAX)
        .await
        .unwrap();
    let m1: Value = serde_json::from_slice(&b1).unwrap();
    let m2: Value = serde_json::from_slice(&b2).unwrap();
    assert_eq!(m1["message"], m2["message"]);
}
