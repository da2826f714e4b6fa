//! Session lifecycle: scheduled → active → completed, with explicit
//! cancellation from either pre-terminal state.

use chrono::{DateTime, Utc};
use db::models::class_session::{
    self, generate_session_code, SessionStatus, SessionType, DEFAULT_RADIUS_METERS,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, Set};

use crate::error::AttendanceError;
use crate::geolocation::{validate_location, GeoPoint};

/// Location input for a physical session.
#[derive(Debug, Clone)]
pub struct SessionLocation {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
    pub radius_meters: Option<i32>,
}

/// Input for creating a session. Defaults follow the platform conventions:
/// 120-minute duration, 50-meter geofence, 15-minute late threshold.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub program_id: i64,
    pub facilitator_id: i64,
    pub session_type: SessionType,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: Option<SessionLocation>,
    pub allow_late_attendance: Option<bool>,
    pub late_threshold_minutes: Option<i32>,
    pub created_by: i64,
}

pub struct SessionService;

impl SessionService {
    /// Validates input and creates a session in `scheduled` state with a
    /// freshly generated public session code.
    pub async fn create(
        db: &DatabaseConnection,
        input: NewSession,
    ) -> Result<class_session::Model, AttendanceError> {
        if input.title.trim().is_empty() {
            return Err(AttendanceError::Validation("title is required".into()));
        }
        let duration = input.duration_minutes.unwrap_or(120);
        if duration <= 0 {
            return Err(AttendanceError::Validation(
                "duration_minutes must be positive".into(),
            ));
        }
        if let Some(end) = input.end_time {
            if end <= input.start_time {
                return Err(AttendanceError::Validation(
                    "end_time must be after start_time".into(),
                ));
            }
        }

        let location = match (&input.session_type, input.location) {
            (SessionType::Physical, None) => {
                return Err(AttendanceError::Validation(
                    "location is required for physical sessions".into(),
                ));
            }
            (SessionType::Physical, Some(loc)) => {
                let point = GeoPoint { lat: loc.lat, lng: loc.lng };
                if !validate_location(&point) {
                    return Err(AttendanceError::Validation(
                        "location coordinates are out of range".into(),
                    ));
                }
                if loc.radius_meters.is_some_and(|r| r <= 0) {
                    return Err(AttendanceError::Validation(
                        "radius_meters must be positive".into(),
                    ));
                }
                Some(loc)
            }
            (SessionType::Online, loc) => loc,
        };

        let expected = class_session::Model::trainee_count_for_program(db, input.program_id).await?;

        let now = Utc::now();
        let session = class_session::ActiveModel {
            session_code: Set(generate_session_code()),
            program_id: Set(input.program_id),
            facilitator_id: Set(input.facilitator_id),
            session_type: Set(input.session_type),
            title: Set(input.title),
            description: Set(input.description),
            start_time: Set(input.start_time),
            duration_minutes: Set(duration),
            end_time: Set(input.end_time),
            latitude: Set(location.as_ref().map(|l| l.lat)),
            longitude: Set(location.as_ref().map(|l| l.lng)),
            address: Set(location.as_ref().and_then(|l| l.address.clone())),
            radius_meters: Set(location
                .as_ref()
                .map(|l| l.radius_meters.unwrap_or(DEFAULT_RADIUS_METERS))),
            status: Set(SessionStatus::Scheduled),
            allow_late_attendance: Set(input.allow_late_attendance.unwrap_or(true)),
            late_threshold_minutes: Set(input.late_threshold_minutes.unwrap_or(15)),
            total_expected: Set(expected as i32),
            created_by: Set(input.created_by),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        Ok(session.insert(db).await?)
    }

    /// Opens attendance-taking: scheduled → active. Idempotent when the
    /// session is already active; terminal states are rejected.
    pub async fn start_attendance(
        db: &DatabaseConnection,
        session: class_session::Model,
    ) -> Result<class_session::Model, AttendanceError> {
        match session.status {
            SessionStatus::Active => Ok(session),
            SessionStatus::Scheduled => {
                let mut active = session.into_active_model();
                active.status = Set(SessionStatus::Active);
                active.qr_opened_at = Set(Some(Utc::now()));
                active.updated_at = Set(Utc::now());
                Ok(active.update(db).await?)
            }
            SessionStatus::Completed | SessionStatus::Cancelled => Err(
                AttendanceError::InvalidState(format!(
                    "Cannot start attendance on a {} session",
                    session.status
                )),
            ),
        }
    }

    /// Explicit completion, allowed from `scheduled` or `active`.
    pub async fn end_session(
        db: &DatabaseConnection,
        session: class_session::Model,
    ) -> Result<class_session::Model, AttendanceError> {
        match session.status {
            SessionStatus::Scheduled | SessionStatus::Active => {
                let mut active = session.into_active_model();
                active.status = Set(SessionStatus::Completed);
                active.updated_at = Set(Utc::now());
                Ok(active.update(db).await?)
            }
            SessionStatus::Completed | SessionStatus::Cancelled => Err(
                AttendanceError::InvalidState(format!("Session is already {}", session.status)),
            ),
        }
    }

    /// Terminal cancellation, allowed from `scheduled` or `active`.
    pub async fn cancel_session(
        db: &DatabaseConnection,
        session: class_session::Model,
    ) -> Result<class_session::Model, AttendanceError> {
        match session.status {
            SessionStatus::Scheduled | SessionStatus::Active => {
                let mut active = session.into_active_model();
                active.status = Set(SessionStatus::Cancelled);
                active.updated_at = Set(Utc::now());
                Ok(active.update(db).await?)
            }
            SessionStatus::Completed | SessionStatus::Cancelled => Err(
                AttendanceError::InvalidState(format!(
                    "Cannot cancel a {} session",
                    session.status
                )),
            ),
        }
    }

    /// Records the latest issued challenge payload on the session row so a
    /// facilitator can re-display it without re-issuing.
    pub async fn record_challenge(
        db: &DatabaseConnection,
        session: class_session::Model,
        payload: &str,
    ) -> Result<class_session::Model, AttendanceError> {
        let mut active = session.into_active_model();
        active.qr_code_data = Set(Some(payload.to_owned()));
        active.qr_last_generated_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        Ok(active.update(db).await?)
    }

    /// Resolves a session by internal id or public code, scoped to a program.
    pub async fn get_in_program(
        db: &DatabaseConnection,
        program_id: i64,
        session_ref: &str,
    ) -> Result<class_session::Model, AttendanceError> {
        class_session::Model::find_by_ref_in_program(db, program_id, session_ref)
            .await?
            .ok_or_else(|| AttendanceError::NotFound("Session not found".into()))
    }
}
