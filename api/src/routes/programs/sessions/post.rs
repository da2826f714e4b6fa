use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::TypedHeader;
use headers::UserAgent;
use serde_json::json;
use std::net::SocketAddr;
use std::str::FromStr;
use util::{config, state::AppState, ws};

use super::common::{
    CreateSessionReq, MarkGeolocationReq, MarkManualReq, MarkQrReq, RecordResponse,
    SessionResponse, SessionWithQrResponse, error_response,
};
use crate::auth::AuthUser;
use crate::auth::guards::Empty;
use crate::response::ApiResponse;
use db::models::class_session::{SessionStatus, SessionType};
use services::attendance::{AttendanceService, MarkContext, session_topic};
use services::geolocation::GeoPoint;
use services::qr::QrService;
use services::session::{NewSession, SessionLocation, SessionService};

/// POST /api/programs/{program_id}/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Path(program_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(body): Json<CreateSessionReq>,
) -> Response {
    let Ok(session_type) = SessionType::from_str(&body.session_type) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::<Empty>::error(format!(
                "Unknown session type '{}'",
                body.session_type
            ))),
        )
            .into_response();
    };

    let location = match (body.latitude, body.longitude) {
        (Some(lat), Some(lng)) => Some(SessionLocation {
            lat,
            lng,
            address: body.address.clone(),
            radius_meters: body.radius_meters,
        }),
        _ => None,
    };

    let input = NewSession {
        program_id,
        facilitator_id: claims.sub,
        session_type,
        title: body.title,
        description: body.description,
        start_time: body.start_time,
        duration_minutes: body.duration_minutes,
        end_time: body.end_time,
        location,
        allow_late_attendance: body.allow_late_attendance,
        late_threshold_minutes: body.late_threshold_minutes,
        created_by: claims.sub,
    };

    match SessionService::create(state.db(), input).await {
        Ok(session) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(
                SessionResponse::from(session),
                "Session created",
            )),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/programs/{program_id}/sessions/{session_ref}/start-attendance
///
/// Transitions the session to active (idempotently) and issues a fresh QR
/// challenge for display.
pub async fn start_attendance(
    State(state): State<AppState>,
    Extension(qr): Extension<QrService>,
    Path((program_id, session_ref)): Path<(i64, String)>,
) -> Response {
    let db = state.db();

    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    let session = match SessionService::start_attendance(db, session).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    issue_and_respond(&state, &qr, session, "Attendance window opened").await
}

/// POST /api/programs/{program_id}/sessions/{session_ref}/qr/refresh
///
/// Re-issues the QR challenge for an active session. Previously scanned
/// payloads remain valid until their own expiry.
pub async fn refresh_qr(
    State(state): State<AppState>,
    Extension(qr): Extension<QrService>,
    Path((program_id, session_ref)): Path<(i64, String)>,
) -> Response {
    let db = state.db();

    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    if session.status != SessionStatus::Active {
        return (
            StatusCode::CONFLICT,
            Json(ApiResponse::<Empty>::error(
                "QR challenges can only be refreshed while the session is active",
            )),
        )
            .into_response();
    }

    issue_and_respond(&state, &qr, session, "QR challenge refreshed").await
}

async fn issue_and_respond(
    state: &AppState,
    qr: &QrService,
    session: db::models::class_session::Model,
    message: &str,
) -> Response {
    let issued = match qr
        .issue(&session.session_code, config::qr_expiry_minutes())
        .await
    {
        Ok(issued) => issued,
        Err(e) => return error_response(e),
    };
    let session =
        match SessionService::record_challenge(state.db(), session, &issued.payload).await {
            Ok(session) => session,
            Err(e) => return error_response(e),
        };

    notify_status(state, &session).await;

    let body = SessionWithQrResponse {
        session: SessionResponse::from(session),
        qr_payload: issued.payload,
        qr_svg: issued.qr_svg,
        qr_expires_at: issued.expires_at.to_rfc3339(),
    };

    (StatusCode::OK, Json(ApiResponse::success(body, message))).into_response()
}

/// POST /api/programs/{program_id}/sessions/{session_ref}/end
pub async fn end_session(
    State(state): State<AppState>,
    Extension(qr): Extension<QrService>,
    Path((program_id, session_ref)): Path<(i64, String)>,
) -> Response {
    let db = state.db();

    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    let session = match SessionService::end_session(db, session).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    qr.revoke(&session.session_code).await;
    notify_status(&state, &session).await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(
            SessionResponse::from(session),
            "Session ended",
        )),
    )
        .into_response()
}

/// POST /api/programs/{program_id}/sessions/{session_ref}/cancel
pub async fn cancel_session(
    State(state): State<AppState>,
    Extension(qr): Extension<QrService>,
    Path((program_id, session_ref)): Path<(i64, String)>,
) -> Response {
    let db = state.db();

    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    let session = match SessionService::cancel_session(db, session).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    qr.revoke(&session.session_code).await;
    notify_status(&state, &session).await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(
            SessionResponse::from(session),
            "Session cancelled",
        )),
    )
        .into_response()
}

async fn notify_status(state: &AppState, session: &db::models::class_session::Model) {
    ws::emit(
        state.ws(),
        &session_topic(session.id),
        "session.updated",
        &json!({ "session_id": session.id, "status": session.status }),
    )
    .await;
}

fn mark_context(addr: SocketAddr, user_agent: Option<TypedHeader<UserAgent>>) -> MarkContext {
    MarkContext {
        device_info: user_agent.map(|TypedHeader(ua)| ua.to_string()),
        ip_address: Some(addr.ip().to_string()),
    }
}

/// POST /api/programs/{program_id}/sessions/{session_ref}/attendance/qr
pub async fn mark_qr(
    State(state): State<AppState>,
    Extension(qr): Extension<QrService>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Path((program_id, session_ref)): Path<(i64, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    user_agent: Option<TypedHeader<UserAgent>>,
    Json(body): Json<MarkQrReq>,
) -> Response {
    let db = state.db();

    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match AttendanceService::mark_by_qr(
        db,
        state.ws(),
        &qr,
        claims.sub,
        &session,
        &body.payload,
        mark_context(addr, user_agent),
    )
    .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                RecordResponse::from(record),
                "Attendance recorded",
            )),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/programs/{program_id}/sessions/{session_ref}/attendance/geolocation
pub async fn mark_geolocation(
    State(state): State<AppState>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Path((program_id, session_ref)): Path<(i64, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    user_agent: Option<TypedHeader<UserAgent>>,
    Json(body): Json<MarkGeolocationReq>,
) -> Response {
    let db = state.db();

    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match AttendanceService::mark_by_geolocation(
        db,
        state.ws(),
        claims.sub,
        &session,
        GeoPoint {
            lat: body.latitude,
            lng: body.longitude,
        },
        mark_context(addr, user_agent),
    )
    .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                RecordResponse::from(record),
                "Attendance recorded",
            )),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/programs/{program_id}/sessions/{session_ref}/attendance/manual
pub async fn mark_manual(
    State(state): State<AppState>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Path((program_id, session_ref)): Path<(i64, String)>,
    Json(body): Json<MarkManualReq>,
) -> Response {
    let db = state.db();

    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match AttendanceService::mark_manual(
        db,
        state.ws(),
        claims.sub,
        body.user_id,
        &session,
        body.status,
        body.reason,
    )
    .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                RecordResponse::from(record),
                "Attendance updated",
            )),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
