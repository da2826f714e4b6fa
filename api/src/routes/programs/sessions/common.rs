use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use services::AttendanceError;

use crate::auth::guards::Empty;
use crate::response::ApiResponse;
use db::models::attendance_record;
use db::models::class_session;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: i64,
    pub session_code: String,
    pub program_id: i64,
    pub facilitator_id: i64,
    pub session_type: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub duration_minutes: i32,
    pub end_time: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub radius_meters: Option<i32>,
    pub status: String,
    pub allow_late_attendance: bool,
    pub late_threshold_minutes: i32,
    pub total_expected: i32,
    pub total_present: i32,
    pub total_absent: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<class_session::Model> for SessionResponse {
    fn from(m: class_session::Model) -> Self {
        Self {
            id: m.id,
            session_code: m.session_code,
            program_id: m.program_id,
            facilitator_id: m.facilitator_id,
            session_type: m.session_type.to_string(),
            title: m.title,
            description: m.description,
            start_time: m.start_time.to_rfc3339(),
            duration_minutes: m.duration_minutes,
            end_time: m.end_time.map(|t| t.to_rfc3339()),
            latitude: m.latitude,
            longitude: m.longitude,
            address: m.address,
            radius_meters: m.radius_meters,
            status: m.status.to_string(),
            allow_late_attendance: m.allow_late_attendance,
            late_threshold_minutes: m.late_threshold_minutes,
            total_expected: m.total_expected,
            total_present: m.total_present,
            total_absent: m.total_absent,
            created_at: m.created_at.to_rfc3339(),
            updated_at: m.updated_at.to_rfc3339(),
        }
    }
}

/// Session plus the currently displayable QR challenge, returned from
/// `start-attendance` and `qr/refresh`.
#[derive(Debug, Serialize)]
pub struct SessionWithQrResponse {
    #[serde(flatten)]
    pub session: SessionResponse,
    pub qr_payload: String,
    pub qr_svg: String,
    pub qr_expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub session_id: i64,
    pub user_id: i64,
    pub marked_at: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub method: String,
    pub status: String,
    pub reason: Option<String>,
    pub marked_by: Option<i64>,
}

impl From<attendance_record::Model> for RecordResponse {
    fn from(m: attendance_record::Model) -> Self {
        Self {
            session_id: m.session_id,
            user_id: m.user_id,
            marked_at: m.marked_at.to_rfc3339(),
            latitude: m.latitude,
            longitude: m.longitude,
            method: m.method.to_string(),
            status: m.status.to_string(),
            reason: m.reason,
            marked_by: m.marked_by,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Search in title.
    pub q: Option<String>,
    /// Filter by lifecycle status.
    pub status: Option<String>,
    /// "start_time", "-start_time", "created_at", "-created_at"
    pub sort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub sessions: Vec<SessionResponse>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionReq {
    pub session_type: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub duration_minutes: Option<i32>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub radius_meters: Option<i32>,
    pub allow_late_attendance: Option<bool>,
    pub late_threshold_minutes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct MarkQrReq {
    /// The scanned QR payload, verbatim.
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkGeolocationReq {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct MarkManualReq {
    pub user_id: i64,
    pub status: attendance_record::AttendanceStatus,
    pub reason: Option<String>,
}

/// Maps a service error onto the response envelope with the right status.
pub fn error_response(err: AttendanceError) -> Response {
    let status = match &err {
        AttendanceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AttendanceError::InvalidChallenge | AttendanceError::OutOfRange { .. } => {
            StatusCode::BAD_REQUEST
        }
        AttendanceError::InvalidState(_)
        | AttendanceError::SessionNotActive
        | AttendanceError::Conflict => StatusCode::CONFLICT,
        AttendanceError::NotEnrolled | AttendanceError::Forbidden(_) => StatusCode::FORBIDDEN,
        AttendanceError::NotFound(_) => StatusCode::NOT_FOUND,
        AttendanceError::Db(e) => {
            tracing::error!(error = %e, "Database error while handling request");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Empty>::error("Internal server error")),
            )
                .into_response();
        }
    };
    (status, Json(ApiResponse::<Empty>::error(err.to_string()))).into_response()
}
