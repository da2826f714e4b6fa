pub mod attendance_record;
pub mod class_session;
pub mod program;
pub mod program_enrollment;
pub mod user;

pub use attendance_record::Entity as AttendanceRecord;
pub use class_session::Entity as ClassSession;
pub use program::Entity as Program;
pub use program_enrollment::Entity as ProgramEnrollment;
pub use user::Entity as User;
