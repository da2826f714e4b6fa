use axum::{Router, routing::get};
use util::state::AppState;

pub mod handlers;

use handlers::attendance_session_ws_handler;

pub fn ws_attendance_routes() -> Router<AppState> {
    Router::new().route("/sessions/{session_id}", get(attendance_session_ws_handler))
}
