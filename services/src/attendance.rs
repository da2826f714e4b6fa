//! Attendance recording: the two trainee proof paths (QR scan, geolocation)
//! plus the privileged manual override, all funnelling into one idempotent
//! upsert against the (session, user) ledger.

use chrono::Utc;
use db::models::attendance_record::{self, AttendanceMethod, AttendanceStatus};
use db::models::class_session::{self, SessionStatus, SessionType};
use db::models::program_enrollment::{Model as EnrollmentModel, Role};
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, Set};
use serde_json::json;
use util::ws::{self, WebSocketManager};

use crate::error::AttendanceError;
use crate::geolocation::{distance_meters, validate_location, GeoPoint};
use crate::qr::QrService;

/// Request-scoped metadata recorded alongside a mark.
#[derive(Debug, Clone, Default)]
pub struct MarkContext {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

/// What a proof path wants written to the ledger.
struct CandidateMark {
    marked_at: chrono::DateTime<Utc>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    method: AttendanceMethod,
    status: AttendanceStatus,
    reason: Option<String>,
    marked_by: Option<i64>,
    device_info: Option<String>,
    ip_address: Option<String>,
}

/// Topic carrying realtime attendance events for one session.
pub fn session_topic(session_id: i64) -> String {
    format!("attendance:session:{session_id}")
}

pub struct AttendanceService;

impl AttendanceService {
    /// Records attendance from a scanned QR payload. The proof instant is the
    /// challenge issuance timestamp, which is server-authoritative.
    pub async fn mark_by_qr(
        db: &DatabaseConnection,
        ws: &WebSocketManager,
        qr: &QrService,
        user_id: i64,
        session: &class_session::Model,
        scanned_payload: &str,
        ctx: MarkContext,
    ) -> Result<attendance_record::Model, AttendanceError> {
        Self::require_trainee(db, user_id, session.program_id).await?;

        let verified = qr.verify(scanned_payload).await?;
        if verified.session_code != session.session_code {
            return Err(AttendanceError::InvalidChallenge);
        }
        if session.status != SessionStatus::Active {
            return Err(AttendanceError::SessionNotActive);
        }

        let status = if session.is_late(verified.timestamp) {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        };

        let candidate = CandidateMark {
            marked_at: verified.timestamp,
            latitude: None,
            longitude: None,
            method: AttendanceMethod::QrCode,
            status,
            reason: None,
            marked_by: None,
            device_info: ctx.device_info,
            ip_address: ctx.ip_address,
        };

        let record = Self::upsert_student_mark(db, session, user_id, candidate).await?;
        Self::refresh_counters_and_notify(db, ws, session, user_id, record.status).await;
        Ok(record)
    }

    /// Records attendance from device coordinates checked against the
    /// session's geofence. Physical, active sessions only.
    pub async fn mark_by_geolocation(
        db: &DatabaseConnection,
        ws: &WebSocketManager,
        user_id: i64,
        session: &class_session::Model,
        coords: GeoPoint,
        ctx: MarkContext,
    ) -> Result<attendance_record::Model, AttendanceError> {
        Self::require_trainee(db, user_id, session.program_id).await?;

        if session.session_type != SessionType::Physical {
            return Err(AttendanceError::InvalidState(
                "Geolocation check-in is only available for physical sessions".into(),
            ));
        }
        if session.status != SessionStatus::Active {
            return Err(AttendanceError::SessionNotActive);
        }
        if !validate_location(&coords) {
            return Err(AttendanceError::Validation(
                "coordinates are out of range".into(),
            ));
        }
        let (Some(lat), Some(lng)) = (session.latitude, session.longitude) else {
            return Err(AttendanceError::InvalidState(
                "Session has no location on record".into(),
            ));
        };

        let center = GeoPoint { lat, lng };
        let radius = f64::from(session.geofence_radius_meters());
        let distance = distance_meters(&coords, &center);
        if distance > radius {
            return Err(AttendanceError::OutOfRange {
                distance_meters: distance,
                radius_meters: radius,
            });
        }

        // Geolocation proofs are timestamped at receipt, server-side.
        let now = Utc::now();
        let status = if session.is_late(now) {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        };

        let candidate = CandidateMark {
            marked_at: now,
            latitude: Some(coords.lat),
            longitude: Some(coords.lng),
            method: AttendanceMethod::Geolocation,
            status,
            reason: None,
            marked_by: None,
            device_info: ctx.device_info,
            ip_address: ctx.ip_address,
        };

        let record = Self::upsert_student_mark(db, session, user_id, candidate).await?;
        Self::refresh_counters_and_notify(db, ws, session, user_id, record.status).await;
        Ok(record)
    }

    /// Facilitator/manager override. Bypasses QR and geofence checks and may
    /// overwrite any existing record, including downgrades.
    pub async fn mark_manual(
        db: &DatabaseConnection,
        ws: &WebSocketManager,
        marker_id: i64,
        user_id: i64,
        session: &class_session::Model,
        status: AttendanceStatus,
        reason: Option<String>,
    ) -> Result<attendance_record::Model, AttendanceError> {
        if status == AttendanceStatus::Excused && reason.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err(AttendanceError::Validation(
                "reason is required when marking a trainee as excused".into(),
            ));
        }
        Self::require_trainee(db, user_id, session.program_id).await?;

        let now = Utc::now();
        let record = match attendance_record::Model::find_one(db, session.id, user_id).await? {
            Some(existing) => {
                let mut active = existing.into_active_model();
                active.status = Set(status);
                active.reason = Set(reason);
                active.method = Set(AttendanceMethod::Manual);
                active.marked_by = Set(Some(marker_id));
                active.marked_at = Set(now);
                active.update(db).await?
            }
            None => {
                let candidate = CandidateMark {
                    marked_at: now,
                    latitude: None,
                    longitude: None,
                    method: AttendanceMethod::Manual,
                    status,
                    reason,
                    marked_by: Some(marker_id),
                    device_info: None,
                    ip_address: None,
                };
                Self::insert_mark(db, session.id, user_id, &candidate).await?
            }
        };

        Self::refresh_counters_and_notify(db, ws, session, user_id, record.status).await;
        Ok(record)
    }

    async fn require_trainee(
        db: &DatabaseConnection,
        user_id: i64,
        program_id: i64,
    ) -> Result<(), AttendanceError> {
        if EnrollmentModel::is_in_role(db, user_id, program_id, Role::Trainee).await? {
            Ok(())
        } else {
            Err(AttendanceError::NotEnrolled)
        }
    }

    async fn insert_mark(
        db: &DatabaseConnection,
        session_id: i64,
        user_id: i64,
        candidate: &CandidateMark,
    ) -> Result<attendance_record::Model, sea_orm::DbErr> {
        let row = attendance_record::ActiveModel {
            session_id: Set(session_id),
            user_id: Set(user_id),
            marked_at: Set(candidate.marked_at),
            latitude: Set(candidate.latitude),
            longitude: Set(candidate.longitude),
            method: Set(candidate.method),
            status: Set(candidate.status),
            reason: Set(candidate.reason.clone()),
            marked_by: Set(candidate.marked_by),
            device_info: Set(candidate.device_info.clone()),
            ip_address: Set(candidate.ip_address.clone()),
        };
        row.insert(db).await
    }

    /// Idempotent upsert for the trainee-facing paths. The composite primary
    /// key is the arbiter under concurrency: a lost insert race is read back
    /// and reconciled exactly like a plain resubmission.
    async fn upsert_student_mark(
        db: &DatabaseConnection,
        session: &class_session::Model,
        user_id: i64,
        candidate: CandidateMark,
    ) -> Result<attendance_record::Model, AttendanceError> {
        if let Some(existing) = attendance_record::Model::find_one(db, session.id, user_id).await? {
            return Self::reconcile(db, session, existing, candidate).await;
        }

        match Self::insert_mark(db, session.id, user_id, &candidate).await {
            Ok(record) => Ok(record),
            Err(insert_err) => {
                // Constraint refused the write: someone beat us to the row.
                // Re-read and reconcile as if this were a resubmission.
                match attendance_record::Model::find_one(db, session.id, user_id).await? {
                    Some(existing) => Self::reconcile(db, session, existing, candidate).await,
                    None => Err(insert_err.into()),
                }
            }
        }
    }

    /// Resolves a mark attempt against an existing ledger row.
    ///
    /// - A `system_absent` row yields to a genuine proof when the session
    ///   allows late attendance: the row is promoted to `late`.
    /// - An attended row absorbs any resubmission unchanged; trainee paths
    ///   can never weaken `present`/`late`.
    /// - Anything else (facilitator-set absent/excused) is a real conflict.
    async fn reconcile(
        db: &DatabaseConnection,
        session: &class_session::Model,
        existing: attendance_record::Model,
        candidate: CandidateMark,
    ) -> Result<attendance_record::Model, AttendanceError> {
        if existing.method == AttendanceMethod::SystemAbsent && candidate.status.is_attended() {
            if !session.allow_late_attendance {
                return Err(AttendanceError::Conflict);
            }
            let mut active = existing.into_active_model();
            active.status = Set(AttendanceStatus::Late);
            active.method = Set(candidate.method);
            active.marked_at = Set(candidate.marked_at);
            active.latitude = Set(candidate.latitude);
            active.longitude = Set(candidate.longitude);
            active.reason = Set(None);
            active.device_info = Set(candidate.device_info);
            active.ip_address = Set(candidate.ip_address);
            return Ok(active.update(db).await?);
        }

        if existing.status.is_attended() {
            return Ok(existing);
        }

        Err(AttendanceError::Conflict)
    }

    /// Best-effort follow-up after a durable mark: refresh the session's
    /// counters and push the updated count to subscribers. Neither step may
    /// fail the mark that already succeeded, so errors are logged and
    /// swallowed here.
    async fn refresh_counters_and_notify(
        db: &DatabaseConnection,
        ws: &WebSocketManager,
        session: &class_session::Model,
        user_id: i64,
        status: AttendanceStatus,
    ) {
        let attended = match session.attended_count(db).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(session_id = session.id, error = %e, "Failed to refresh attendance counters");
                return;
            }
        };

        let mut active = session.clone().into_active_model();
        active.total_present = Set(attended as i32);
        active.updated_at = Set(Utc::now());
        if let Err(e) = active.update(db).await {
            tracing::warn!(session_id = session.id, error = %e, "Failed to persist attendance counters");
        }

        ws::emit(
            ws,
            &session_topic(session.id),
            "attendance.marked",
            &json!({
                "session_id": session.id,
                "user_id": user_id,
                "status": status,
                "attended_count": attended,
            }),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{NewSession, SessionLocation, SessionService};
    use chrono::Duration;
    use db::models::program::Model as ProgramModel;
    use db::models::user::Model as UserModel;
    use db::test_utils::setup_test_db;
    use sea_orm::PaginatorTrait;

    struct Ctx {
        db: sea_orm::DatabaseConnection,
        ws: WebSocketManager,
        qr: QrService,
        program_id: i64,
        facilitator_id: i64,
        trainee_id: i64,
    }

    async fn setup() -> Ctx {
        let db = setup_test_db().await;
        let program = ProgramModel::create(&db, "TP101", "Induction", None)
            .await
            .unwrap();
        let facilitator = UserModel::create(&db, "fac", "fac@test.com", "password", false)
            .await
            .unwrap();
        let trainee = UserModel::create(&db, "trainee", "trainee@test.com", "password", false)
            .await
            .unwrap();
        EnrollmentModel::enroll(&db, facilitator.id, program.id, Role::Facilitator)
            .await
            .unwrap();
        EnrollmentModel::enroll(&db, trainee.id, program.id, Role::Trainee)
            .await
            .unwrap();

        Ctx {
            db,
            ws: WebSocketManager::new(),
            qr: QrService::with_in_memory_store("attendance-test-secret"),
            program_id: program.id,
            facilitator_id: facilitator.id,
            trainee_id: trainee.id,
        }
    }

    async fn active_session(ctx: &Ctx, started_minutes_ago: i64) -> class_session::Model {
        let session = SessionService::create(
            &ctx.db,
            NewSession {
                program_id: ctx.program_id,
                facilitator_id: ctx.facilitator_id,
                session_type: SessionType::Physical,
                title: "Morning class".into(),
                description: None,
                start_time: Utc::now() - Duration::minutes(started_minutes_ago),
                duration_minutes: Some(60),
                end_time: None,
                location: Some(SessionLocation {
                    lat: 0.0,
                    lng: 0.0,
                    address: None,
                    radius_meters: Some(50),
                }),
                allow_late_attendance: None,
                late_threshold_minutes: Some(10),
                created_by: ctx.facilitator_id,
            },
        )
        .await
        .unwrap();
        SessionService::start_attendance(&ctx.db, session)
            .await
            .unwrap()
    }

    async fn record_count(db: &sea_orm::DatabaseConnection, session_id: i64) -> u64 {
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
        attendance_record::Entity::find()
            .filter(attendance_record::Column::SessionId.eq(session_id))
            .count(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn qr_scan_marks_present_and_rescan_is_a_noop() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;
        let issued = ctx.qr.issue(&session.session_code, 15).await.unwrap();

        let first = AttendanceService::mark_by_qr(
            &ctx.db,
            &ctx.ws,
            &ctx.qr,
            ctx.trainee_id,
            &session,
            &issued.payload,
            MarkContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(first.method, AttendanceMethod::QrCode);
        assert_eq!(first.status, AttendanceStatus::Present);

        // Fresh re-issue, second scan: still exactly one unchanged record.
        let reissued = ctx.qr.issue(&session.session_code, 15).await.unwrap();
        let second = AttendanceService::mark_by_qr(
            &ctx.db,
            &ctx.ws,
            &ctx.qr,
            ctx.trainee_id,
            &session,
            &reissued.payload,
            MarkContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(second.status, AttendanceStatus::Present);
        assert_eq!(second.marked_at, first.marked_at);
        assert_eq!(record_count(&ctx.db, session.id).await, 1);
    }

    #[tokio::test]
    async fn qr_scan_past_threshold_marks_late() {
        let ctx = setup().await;
        // Session started 13 minutes ago, threshold 10: challenge issued now.
        let session = active_session(&ctx, 13).await;
        let issued = ctx.qr.issue(&session.session_code, 15).await.unwrap();

        let record = AttendanceService::mark_by_qr(
            &ctx.db,
            &ctx.ws,
            &ctx.qr,
            ctx.trainee_id,
            &session,
            &issued.payload,
            MarkContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(record.status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn qr_payload_for_another_session_is_rejected() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;
        let other = ctx.qr.issue("somebody-else", 15).await.unwrap();

        let result = AttendanceService::mark_by_qr(
            &ctx.db,
            &ctx.ws,
            &ctx.qr,
            ctx.trainee_id,
            &session,
            &other.payload,
            MarkContext::default(),
        )
        .await;
        assert!(matches!(result, Err(AttendanceError::InvalidChallenge)));
        assert_eq!(record_count(&ctx.db, session.id).await, 0);
    }

    #[tokio::test]
    async fn geolocation_inside_the_fence_marks_present() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;

        let record = AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            ctx.trainee_id,
            &session,
            GeoPoint { lat: 0.0001, lng: 0.0 }, // ~11 m out
            MarkContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(record.method, AttendanceMethod::Geolocation);
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.latitude, Some(0.0001));
    }

    #[tokio::test]
    async fn geolocation_outside_the_fence_is_rejected_without_a_record() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;

        let result = AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            ctx.trainee_id,
            &session,
            GeoPoint { lat: 0.001, lng: 0.0 }, // ~111 m out, radius 50
            MarkContext::default(),
        )
        .await;
        assert!(matches!(result, Err(AttendanceError::OutOfRange { .. })));
        assert_eq!(record_count(&ctx.db, session.id).await, 0);
    }

    #[tokio::test]
    async fn unenrolled_users_cannot_mark() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;
        let outsider = UserModel::create(&ctx.db, "out", "out@test.com", "password", false)
            .await
            .unwrap();

        let result = AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            outsider.id,
            &session,
            GeoPoint { lat: 0.0, lng: 0.0 },
            MarkContext::default(),
        )
        .await;
        assert!(matches!(result, Err(AttendanceError::NotEnrolled)));
    }

    #[tokio::test]
    async fn scheduled_sessions_reject_marks() {
        let ctx = setup().await;
        let session = SessionService::create(
            &ctx.db,
            NewSession {
                program_id: ctx.program_id,
                facilitator_id: ctx.facilitator_id,
                session_type: SessionType::Physical,
                title: "Not yet open".into(),
                description: None,
                start_time: Utc::now(),
                duration_minutes: None,
                end_time: None,
                location: Some(SessionLocation {
                    lat: 0.0,
                    lng: 0.0,
                    address: None,
                    radius_meters: None,
                }),
                allow_late_attendance: None,
                late_threshold_minutes: None,
                created_by: ctx.facilitator_id,
            },
        )
        .await
        .unwrap();

        let result = AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            ctx.trainee_id,
            &session,
            GeoPoint { lat: 0.0, lng: 0.0 },
            MarkContext::default(),
        )
        .await;
        assert!(matches!(result, Err(AttendanceError::SessionNotActive)));
    }

    #[tokio::test]
    async fn manual_excused_requires_a_reason() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;

        let result = AttendanceService::mark_manual(
            &ctx.db,
            &ctx.ws,
            ctx.facilitator_id,
            ctx.trainee_id,
            &session,
            AttendanceStatus::Excused,
            None,
        )
        .await;
        assert!(matches!(result, Err(AttendanceError::Validation(_))));
    }

    #[tokio::test]
    async fn manual_override_may_downgrade_an_attended_record() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;

        AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            ctx.trainee_id,
            &session,
            GeoPoint { lat: 0.0, lng: 0.0 },
            MarkContext::default(),
        )
        .await
        .unwrap();

        let overridden = AttendanceService::mark_manual(
            &ctx.db,
            &ctx.ws,
            ctx.facilitator_id,
            ctx.trainee_id,
            &session,
            AttendanceStatus::Excused,
            Some("Medical certificate on file".into()),
        )
        .await
        .unwrap();
        assert_eq!(overridden.status, AttendanceStatus::Excused);
        assert_eq!(overridden.marked_by, Some(ctx.facilitator_id));
        assert_eq!(record_count(&ctx.db, session.id).await, 1);
    }

    #[tokio::test]
    async fn student_path_cannot_weaken_a_manual_absent() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;

        AttendanceService::mark_manual(
            &ctx.db,
            &ctx.ws,
            ctx.facilitator_id,
            ctx.trainee_id,
            &session,
            AttendanceStatus::Absent,
            None,
        )
        .await
        .unwrap();

        let result = AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            ctx.trainee_id,
            &session,
            GeoPoint { lat: 0.0, lng: 0.0 },
            MarkContext::default(),
        )
        .await;
        assert!(matches!(result, Err(AttendanceError::Conflict)));
    }

    #[tokio::test]
    async fn system_absence_is_promoted_to_late_by_a_genuine_proof() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;

        // Simulate the sweeper having back-filled an absence.
        insert_system_absent(&ctx.db, session.id, ctx.trainee_id).await;

        let record = AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            ctx.trainee_id,
            &session,
            GeoPoint { lat: 0.0, lng: 0.0 },
            MarkContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(record.status, AttendanceStatus::Late);
        assert_eq!(record.method, AttendanceMethod::Geolocation);
        assert_eq!(record_count(&ctx.db, session.id).await, 1);
    }

    #[tokio::test]
    async fn system_absence_stays_when_late_attendance_is_disallowed() {
        let ctx = setup().await;
        let session = active_session(&ctx, 2).await;
        let mut active = session.clone().into_active_model();
        active.allow_late_attendance = Set(false);
        let session = active.update(&ctx.db).await.unwrap();

        insert_system_absent(&ctx.db, session.id, ctx.trainee_id).await;

        let result = AttendanceService::mark_by_geolocation(
            &ctx.db,
            &ctx.ws,
            ctx.trainee_id,
            &session,
            GeoPoint { lat: 0.0, lng: 0.0 },
            MarkContext::default(),
        )
        .await;
        assert!(matches!(result, Err(AttendanceError::Conflict)));
    }

    async fn insert_system_absent(db: &sea_orm::DatabaseConnection, session_id: i64, user_id: i64) {
        let row = attendance_record::ActiveModel {
            session_id: Set(session_id),
            user_id: Set(user_id),
            marked_at: Set(Utc::now()),
            latitude: Set(None),
            longitude: Set(None),
            method: Set(AttendanceMethod::SystemAbsent),
            status: Set(AttendanceStatus::Absent),
            reason: Set(Some(
                "Automatically marked absent (no check-in record)".into(),
            )),
            marked_by: Set(None),
            device_info: Set(None),
            ip_address: Set(None),
        };
        row.insert(db).await.unwrap();
    }
}
