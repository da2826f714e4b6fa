use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::helpers::make_test_app;
use api::auth::generate_jwt;
use db::models::program::Model as ProgramModel;
use db::models::program_enrollment::{Model as EnrollmentModel, Role};
use db::models::user::Model as UserModel;

struct Ctx {
    program_id: i64,
    facilitator_token: String,
    trainee_token: String,
}

async fn setup(db: &sea_orm::DatabaseConnection) -> Ctx {
    let program = ProgramModel::create(db, "TP300", "Safety basics", None)
        .await
        .unwrap();
    let facilitator = UserModel::create(db, "fac", "fac@test.com", "password", false)
        .await
        .unwrap();
    let trainee = UserModel::create(db, "trainee", "trainee@test.com", "password", false)
        .await
        .unwrap();
    EnrollmentModel::enroll(db, facilitator.id, program.id, Role::Facilitator)
        .await
        .unwrap();
    EnrollmentModel::enroll(db, trainee.id, program.id, Role::Trainee)
        .await
        .unwrap();

    let (facilitator_token, _) = generate_jwt(facilitator.id, false);
    let (trainee_token, _) = generate_jwt(trainee.id, false);

    Ctx {
        program_id: program.id,
        facilitator_token,
        trainee_token,
    }
}

fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn session_body() -> Value {
    json!({
        "session_type": "physical",
        "title": "Fire drill briefing",
        "start_time": Utc::now() - Duration::minutes(5),
        "duration_minutes": 60,
        "latitude": -25.7545,
        "longitude": 28.2314,
        "radius_meters": 75,
    })
}

#[tokio::test]
async fn facilitator_creates_a_scheduled_session() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(state.db()).await;

    let uri = format!("/api/programs/{}/sessions", ctx.program_id);
    let response = app
        .oneshot(post_json(&uri, &ctx.facilitator_token, session_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "scheduled");
    assert_eq!(body["data"]["total_expected"], 1); // one enrolled trainee
    assert_eq!(
        body["data"]["session_code"].as_str().unwrap().len(),
        32
    );
}

#[tokio::test]
async fn trainees_cannot_create_sessions() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(state.db()).await;

    let uri = format!("/api/programs/{}/sessions", ctx.program_id);
    let response = app
        .oneshot(post_json(&uri, &ctx.trainee_token, session_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(state.db()).await;

    let uri = format!("/api/programs/{}/sessions", ctx.program_id);
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(&uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn start_attendance_activates_and_issues_a_qr_challenge() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(state.db()).await;

    let base = format!("/api/programs/{}/sessions", ctx.program_id);
    let created = app
        .clone()
        .oneshot(post_json(&base, &ctx.facilitator_token, session_body()))
        .await
        .unwrap();
    let created = body_json(created).await;
    let session_id = created["data"]["id"].as_i64().unwrap();

    let uri = format!("{base}/{session_id}/start-attendance");
    let response = app
        .clone()
        .oneshot(post_empty(&uri, &ctx.facilitator_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "active");
    let payload = body["data"]["qr_payload"].as_str().unwrap();
    let parsed: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(parsed["type"], "attendance");
    assert!(body["data"]["qr_svg"].as_str().unwrap().contains("<svg"));

    // Starting again is idempotent.
    let again = app
        .oneshot(post_empty(&uri, &ctx.facilitator_token))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(body_json(again).await["data"]["status"], "active");
}

#[tokio::test]
async fn ended_sessions_cannot_be_cancelled() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(state.db()).await;

    let base = format!("/api/programs/{}/sessions", ctx.program_id);
    let created = body_json(
        app.clone()
            .oneshot(post_json(&base, &ctx.facilitator_token, session_body()))
            .await
            .unwrap(),
    )
    .await;
    let session_id = created["data"]["id"].as_i64().unwrap();

    let ended = app
        .clone()
        .oneshot(post_empty(
            &format!("{base}/{session_id}/end"),
            &ctx.facilitator_token,
        ))
        .await
        .unwrap();
    assert_eq!(ended.status(), StatusCode::OK);
    assert_eq!(body_json(ended).await["data"]["status"], "completed");

    let cancel = app
        .oneshot(post_empty(
            &format!("{base}/{session_id}/cancel"),
            &ctx.facilitator_token,
        ))
        .await
        .unwrap();
    assert_eq!(cancel.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn sessions_resolve_by_public_code_as_well_as_id() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(state.db()).await;

    let base = format!("/api/programs/{}/sessions", ctx.program_id);
    let created = body_json(
        app.clone()
            .oneshot(post_json(&base, &ctx.facilitator_token, session_body()))
            .await
            .unwrap(),
    )
    .await;
    let code = created["data"]["session_code"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get(&format!("{base}/{code}"), &ctx.trainee_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["session_code"], code.as_str());
}

#[tokio::test]
async fn listing_filters_by_status() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(state.db()).await;

    let base = format!("/api/programs/{}/sessions", ctx.program_id);
    for _ in 0..2 {
        app.clone()
            .oneshot(post_json(&base, &ctx.facilitator_token, session_body()))
            .await
            .unwrap();
    }
    let created = body_json(
        app.clone()
            .oneshot(post_json(&base, &ctx.facilitator_token, session_body()))
            .await
            .unwrap(),
    )
    .await;
    let session_id = created["data"]["id"].as_i64().unwrap();
    app.clone()
        .oneshot(post_empty(
            &format!("{base}/{session_id}/start-attendance"),
            &ctx.facilitator_token,
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(get(&format!("{base}?status=active"), &ctx.facilitator_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["sessions"][0]["id"], session_id);
}
