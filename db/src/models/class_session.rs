use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{attendance_record, program_enrollment};

/// A scheduled occurrence of a program meeting, physical or online, that
/// attendance is taken against.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "class_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Public opaque token used by QR payloads and deep links. Immutable and
    /// unique; the durable primary key is never exposed to clients.
    pub session_code: String,
    pub program_id: i64,
    pub facilitator_id: i64,
    pub session_type: SessionType,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    /// Explicit end time; when absent the end is `start_time + duration`.
    pub end_time: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub radius_meters: Option<i32>,
    pub status: SessionStatus,
    /// Last-issued QR challenge payload, kept for facilitator re-display.
    pub qr_code_data: Option<String>,
    pub qr_opened_at: Option<DateTime<Utc>>,
    pub qr_last_generated_at: Option<DateTime<Utc>>,
    pub allow_late_attendance: bool,
    pub late_threshold_minutes: i32,
    pub total_expected: i32,
    pub total_present: i32,
    pub total_absent: i32,
    /// Sweep idempotency guard; flips true exactly once per session.
    pub absenteeism_processed: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Geofence radius applied when a physical session does not set one.
pub const DEFAULT_RADIUS_METERS: i32 = 50;

#[derive(
    Debug, Clone, Copy, PartialEq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "session_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SessionType {
    #[sea_orm(string_value = "physical")]
    Physical,
    #[sea_orm(string_value = "online")]
    Online,
}

#[derive(
    Debug, Clone, Copy, PartialEq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "session_status_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SessionStatus {
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::program::Entity",
        from = "Column::ProgramId",
        to = "super::program::Column::Id"
    )]
    Program,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::FacilitatorId",
        to = "super::user::Column::Id"
    )]
    Facilitator,
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::program::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Program.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Generates a fresh public session code: 16 random bytes, hex-encoded.
pub fn generate_session_code() -> String {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

impl Model {
    /// The instant attendance-taking closes for this session.
    pub fn effective_end_time(&self) -> DateTime<Utc> {
        self.end_time
            .unwrap_or(self.start_time + Duration::minutes(i64::from(self.duration_minutes)))
    }

    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now > self.effective_end_time()
    }

    /// True if a proof produced at `marked_at` falls past the late threshold.
    pub fn is_late(&self, marked_at: DateTime<Utc>) -> bool {
        marked_at > self.start_time + Duration::minutes(i64::from(self.late_threshold_minutes))
    }

    pub fn geofence_radius_meters(&self) -> i32 {
        self.radius_meters.unwrap_or(DEFAULT_RADIUS_METERS)
    }

    /// Looks a session up by either key: a numeric internal id or the public
    /// session code. QR payloads and deep links only ever carry the code.
    pub async fn find_by_ref(
        db: &DatabaseConnection,
        session_ref: &str,
    ) -> Result<Option<Self>, DbErr> {
        if let Ok(id) = session_ref.parse::<i64>() {
            if let Some(found) = Entity::find_by_id(id).one(db).await? {
                return Ok(Some(found));
            }
        }
        Entity::find()
            .filter(Column::SessionCode.eq(session_ref))
            .one(db)
            .await
    }

    /// Same lookup, scoped to a program (route handlers carry the program id).
    pub async fn find_by_ref_in_program(
        db: &DatabaseConnection,
        program_id: i64,
        session_ref: &str,
    ) -> Result<Option<Self>, DbErr> {
        let found = Self::find_by_ref(db, session_ref).await?;
        Ok(found.filter(|s| s.program_id == program_id))
    }

    pub async fn trainee_count_for_program(
        db: &DatabaseConnection,
        program_id: i64,
    ) -> Result<i64, DbErr> {
        let c = program_enrollment::Entity::find()
            .filter(program_enrollment::Column::ProgramId.eq(program_id))
            .filter(program_enrollment::Column::Role.eq(program_enrollment::Role::Trainee))
            .count(db)
            .await?;
        Ok(c as i64)
    }

    /// Number of records for this session that count as attended
    /// (present or late).
    pub async fn attended_count(&self, db: &DatabaseConnection) -> Result<i64, DbErr> {
        let c = attendance_record::Entity::find()
            .filter(attendance_record::Column::SessionId.eq(self.id))
            .filter(
                attendance_record::Column::Status.is_in([
                    attendance_record::AttendanceStatus::Present,
                    attendance_record::AttendanceStatus::Late,
                ]),
            )
            .count(db)
            .await?;
        Ok(c as i64)
    }
}
