use axum::{
    Router,
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
    base: String,
    session_id: i64,
    qr_payload: String,
    facilitator_token: String,
    trainee_id: i64,
    trainee_token: String,
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

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Seeds a program with an active physical session at (0, 0), radius 50 m,
/// and returns the issued QR payload from the start-attendance call.
async fn setup(app: &Router, db: &sea_orm::DatabaseConnection) -> Ctx {
    let program = ProgramModel::create(db, "TP400", "Orientation", None)
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

    let base = format!("/api/programs/{}/sessions", program.id);
    let created = body_json(
        app.clone()
            .oneshot(post_json(
                &base,
                &facilitator_token,
                json!({
                    "session_type": "physical",
                    "title": "Day one",
                    "start_time": Utc::now() - Duration::minutes(2),
                    "duration_minutes": 60,
                    "latitude": 0.0,
                    "longitude": 0.0,
                    "radius_meters": 50,
                }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let session_id = created["data"]["id"].as_i64().unwrap();

    let started = body_json(
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("{base}/{session_id}/start-attendance"))
                    .header("Authorization", format!("Bearer {facilitator_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
    )
    .await;
    let qr_payload = started["data"]["qr_payload"].as_str().unwrap().to_string();

    Ctx {
        base,
        session_id,
        qr_payload,
        facilitator_token,
        trainee_id: trainee.id,
        trainee_token,
    }
}

#[tokio::test]
async fn trainee_marks_attendance_by_scanning_the_qr() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(&app, state.db()).await;

    let uri = format!("{}/{}/attendance/qr", ctx.base, ctx.session_id);
    let response = app
        .clone()
        .oneshot(post_json(
            &uri,
            &ctx.trainee_token,
            json!({ "payload": ctx.qr_payload }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "present");
    assert_eq!(body["data"]["method"], "qr_code");

    // A second scan is absorbed without error or duplicate.
    let again = app
        .oneshot(post_json(
            &uri,
            &ctx.trainee_token,
            json!({ "payload": ctx.qr_payload }),
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn tampered_qr_payloads_are_rejected() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(&app, state.db()).await;

    let mut parsed: Value = serde_json::from_str(&ctx.qr_payload).unwrap();
    parsed["session_code"] = json!("00000000000000000000000000000000");
    let uri = format!("{}/{}/attendance/qr", ctx.base, ctx.session_id);
    let response = app
        .oneshot(post_json(
            &uri,
            &ctx.trainee_token,
            json!({ "payload": parsed.to_string() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn geolocation_inside_the_fence_marks_present() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(&app, state.db()).await;

    let uri = format!("{}/{}/attendance/geolocation", ctx.base, ctx.session_id);
    let response = app
        .oneshot(post_json(
            &uri,
            &ctx.trainee_token,
            json!({ "latitude": 0.0001, "longitude": 0.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "present");
    assert_eq!(body["data"]["method"], "geolocation");
}

#[tokio::test]
async fn geolocation_outside_the_fence_is_rejected() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(&app, state.db()).await;

    let uri = format!("{}/{}/attendance/geolocation", ctx.base, ctx.session_id);
    let response = app
        .oneshot(post_json(
            &uri,
            &ctx.trainee_token,
            json!({ "latitude": 0.01, "longitude": 0.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn facilitators_cannot_mark_themselves_via_the_trainee_path() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(&app, state.db()).await;

    let uri = format!("{}/{}/attendance/qr", ctx.base, ctx.session_id);
    let response = app
        .oneshot(post_json(
            &uri,
            &ctx.facilitator_token,
            json!({ "payload": ctx.qr_payload }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn manual_marking_requires_a_reason_for_excused() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(&app, state.db()).await;

    let uri = format!("{}/{}/attendance/manual", ctx.base, ctx.session_id);
    let missing_reason = app
        .clone()
        .oneshot(post_json(
            &uri,
            &ctx.facilitator_token,
            json!({ "user_id": ctx.trainee_id, "status": "excused" }),
        ))
        .await
        .unwrap();
    assert_eq!(missing_reason.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let with_reason = app
        .oneshot(post_json(
            &uri,
            &ctx.facilitator_token,
            json!({
                "user_id": ctx.trainee_id,
                "status": "excused",
                "reason": "Medical certificate on file",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(with_reason.status(), StatusCode::OK);
    let body = body_json(with_reason).await;
    assert_eq!(body["data"]["status"], "excused");
}

#[tokio::test]
async fn staff_can_list_session_records_but_trainees_cannot() {
    let (app, state, _qr) = make_test_app().await;
    let ctx = setup(&app, state.db()).await;

    let mark_uri = format!("{}/{}/attendance/qr", ctx.base, ctx.session_id);
    app.clone()
        .oneshot(post_json(
            &mark_uri,
            &ctx.trainee_token,
            json!({ "payload": ctx.qr_payload }),
        ))
        .await
        .unwrap();

    let records_uri = format!("{}/{}/records", ctx.base, ctx.session_id);
    let staff_view = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(&records_uri)
                .header("Authorization", format!("Bearer {}", ctx.facilitator_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(staff_view.status(), StatusCode::OK);
    let body = body_json(staff_view).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["user_id"], ctx.trainee_id);

    let trainee_view = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(&records_uri)
                .header("Authorization", format!("Bearer {}", ctx.trainee_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(trainee_view.status(), StatusCode::FORBIDDEN);
}
