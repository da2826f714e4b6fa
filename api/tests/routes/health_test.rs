use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

use crate::helpers::make_test_app;

#[tokio::test]
async fn health_check_reports_service_up() {
    let (app, _state, _qr) = make_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["database"], "up");
}

#[tokio::test]
async fn assembled_router_is_state_free_and_serveable() {
    let (app, _state, _qr) = make_test_app().await;

    // The binary hands this exact service to axum::serve; the conversion only
    // exists once all state has been applied inside the route builders.
    let _service = app.into_make_service_with_connect_info::<std::net::SocketAddr>();
}
