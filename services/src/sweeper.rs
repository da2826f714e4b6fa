//! Background sweep over session state. Each tick runs two passes in order:
//! first active sessions whose window has elapsed are completed, then freshly
//! completed sessions get absences back-filled for trainees with no record.

use chrono::{Duration, Utc};
use db::models::attendance_record::{self, AttendanceMethod, AttendanceStatus};
use db::models::class_session::{self, SessionStatus};
use db::models::program_enrollment::Model as EnrollmentModel;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use serde_json::json;
use util::ws::{self, WebSocketManager};

use crate::attendance::session_topic;
use crate::error::AttendanceError;

pub const ABSENT_REASON: &str = "Automatically marked absent (no check-in record)";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub completed: u64,
    pub backfilled: u64,
}

/// Runs one sweep tick. Safe to call concurrently with live marking: the
/// ledger's primary key makes the backfill insert a no-op for any trainee
/// who checked in while the sweep was scanning.
///
/// `absenteeism_window` bounds how long after a session's end the backfill
/// pass is still willing to insert absences. The caller supplies it, so the
/// sweep itself never touches process configuration.
pub async fn run_once(
    db: &DatabaseConnection,
    ws: &WebSocketManager,
    absenteeism_window: Duration,
) -> Result<SweepOutcome, AttendanceError> {
    let mut outcome = SweepOutcome::default();
    let now = Utc::now();

    outcome.completed = complete_elapsed_sessions(db, ws, now).await?;
    outcome.backfilled = backfill_absences(db, ws, now, absenteeism_window).await?;

    Ok(outcome)
}

async fn complete_elapsed_sessions(
    db: &DatabaseConnection,
    ws: &WebSocketManager,
    now: chrono::DateTime<Utc>,
) -> Result<u64, AttendanceError> {
    let active = class_session::Entity::find()
        .filter(class_session::Column::Status.eq(SessionStatus::Active))
        .all(db)
        .await?;

    let mut completed = 0u64;
    for session in active {
        if !session.is_past_end(now) {
            continue;
        }
        let session_id = session.id;
        let mut model = session.into_active_model();
        model.status = Set(SessionStatus::Completed);
        model.updated_at = Set(now);
        let updated = model.update(db).await?;

        tracing::info!(session_id, "Session window elapsed, marked completed");
        ws::emit(
            ws,
            &session_topic(session_id),
            "session.completed",
            &json!({ "session_id": session_id, "status": updated.status }),
        )
        .await;
        completed += 1;
    }
    Ok(completed)
}

async fn backfill_absences(
    db: &DatabaseConnection,
    ws: &WebSocketManager,
    now: chrono::DateTime<Utc>,
    window: Duration,
) -> Result<u64, AttendanceError> {
    let pending = class_session::Entity::find()
        .filter(class_session::Column::Status.eq(SessionStatus::Completed))
        .filter(class_session::Column::AbsenteeismProcessed.eq(false))
        .all(db)
        .await?;

    let mut backfilled = 0u64;
    for session in pending {
        let ended_at = session.effective_end_time();
        if now - ended_at > window {
            // Too old to retroactively judge. Mark it processed so the sweep
            // stops rescanning it, but leave the ledger alone.
            tracing::warn!(
                session_id = session.id,
                ended_at = %ended_at,
                "Session completed outside the absenteeism window, skipping backfill"
            );
            finish_session(db, session, None, now).await?;
            continue;
        }

        let roster = EnrollmentModel::trainee_ids_for_program(db, session.program_id).await?;
        let already_marked = attendance_record::Model::user_ids_for_session(db, session.id).await?;

        let missing: Vec<i64> = roster
            .iter()
            .copied()
            .filter(|id| !already_marked.contains(id))
            .collect();

        if !missing.is_empty() {
            let rows = missing.iter().map(|&user_id| attendance_record::ActiveModel {
                session_id: Set(session.id),
                user_id: Set(user_id),
                marked_at: Set(now),
                latitude: Set(None),
                longitude: Set(None),
                method: Set(AttendanceMethod::SystemAbsent),
                status: Set(AttendanceStatus::Absent),
                reason: Set(Some(ABSENT_REASON.to_string())),
                marked_by: Set(None),
                device_info: Set(None),
                ip_address: Set(None),
            });
            // Anyone who slipped a real mark in between the scan and this
            // insert keeps their record.
            attendance_record::Entity::insert_many(rows)
                .on_conflict(
                    OnConflict::columns([
                        attendance_record::Column::SessionId,
                        attendance_record::Column::UserId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(db)
                .await?;
        }

        let session_id = session.id;
        let roster_size = roster.len();
        let attended = session.attended_count(db).await?;
        let absent = roster_size.saturating_sub(attended as usize);

        tracing::info!(
            session_id,
            roster = roster_size,
            attended,
            absent,
            "Back-filled absences for completed session"
        );

        finish_session(db, session, Some((roster_size, attended, absent)), now).await?;
        ws::emit(
            ws,
            &session_topic(session_id),
            "session.absences_backfilled",
            &json!({
                "session_id": session_id,
                "total_expected": roster_size,
                "total_present": attended,
                "total_absent": absent,
            }),
        )
        .await;
        backfilled += missing.len() as u64;
    }

    Ok(backfilled)
}

async fn finish_session(
    db: &DatabaseConnection,
    session: class_session::Model,
    counters: Option<(usize, i64, usize)>,
    now: chrono::DateTime<Utc>,
) -> Result<(), AttendanceError> {
    let mut model = session.into_active_model();
    if let Some((expected, present, absent)) = counters {
        model.total_expected = Set(expected as i32);
        model.total_present = Set(present as i32);
        model.total_absent = Set(absent as i32);
    }
    model.absenteeism_processed = Set(true);
    model.updated_at = Set(now);
    model.update(db).await?;
    Ok(())
}

/// Spawns the periodic sweep loop. Runs immediately, then every `period`.
/// Each tick also purges expired QR challenges from the registry.
/// A failed tick is logged and the loop keeps going.
pub fn spawn(
    db: DatabaseConnection,
    ws: WebSocketManager,
    qr: crate::qr::QrService,
    period: std::time::Duration,
    absenteeism_window: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let purged = qr.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired QR challenges");
            }
            match run_once(&db, &ws, absenteeism_window).await {
                Ok(outcome) => {
                    if outcome.completed > 0 || outcome.backfilled > 0 {
                        tracing::info!(
                            completed = outcome.completed,
                            backfilled = outcome.backfilled,
                            "Attendance sweep tick finished"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "Attendance sweep tick failed"),
            }
        }
    })
}
