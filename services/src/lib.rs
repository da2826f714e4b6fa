pub mod attendance;
pub mod error;
pub mod geolocation;
pub mod qr;
pub mod session;
pub mod sweeper;

pub use error::AttendanceError;
