use sea_orm::DbErr;
use thiserror::Error;

/// Error taxonomy for the session attendance subsystem.
///
/// Every variant maps to a distinct caller-facing outcome; the API layer owns
/// the translation to HTTP status codes. `InvalidChallenge` deliberately
/// carries no detail on which check failed.
#[derive(Debug, Error)]
pub enum AttendanceError {
    /// Malformed or missing input to session creation or manual marking.
    #[error("{0}")]
    Validation(String),

    /// Operation attempted against a session in a state that forbids it.
    #[error("{0}")]
    InvalidState(String),

    /// QR payload failed the signature check, is expired, or references an
    /// unknown session. One generic message for all three.
    #[error("Invalid or expired attendance code")]
    InvalidChallenge,

    /// Geolocation proof landed outside the session's geofence.
    #[error("You are not close enough to the session location")]
    OutOfRange {
        distance_meters: f64,
        radius_meters: f64,
    },

    /// Session is not open for attendance-taking.
    #[error("Session is not open for attendance")]
    SessionNotActive,

    /// Caller is not on the program roster.
    #[error("You are not enrolled in this program")]
    NotEnrolled,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// A genuine conflicting re-mark through a non-privileged path.
    #[error("Attendance already recorded with a different outcome")]
    Conflict,

    #[error(transparent)]
    Db(#[from] DbErr),
}
