use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use util::state::AppState;

mod common;
mod get;
mod post;

pub use common::{SessionResponse, error_response};
pub use get::{get_session, list_session_records, list_sessions};
pub use post::{
    cancel_session, create_session, end_session, mark_geolocation, mark_manual, mark_qr,
    refresh_qr, start_attendance,
};

use crate::auth::guards::{allow_facilitator_or_manager, allow_program_member};

pub fn session_routes(app_state: AppState) -> Router<AppState> {
    let staff = |s: &AppState| from_fn_with_state(s.clone(), allow_facilitator_or_manager);
    let member = |s: &AppState| from_fn_with_state(s.clone(), allow_program_member);

    Router::new()
        .route(
            "/",
            post(create_session).route_layer(staff(&app_state)),
        )
        .route("/", get(list_sessions).route_layer(member(&app_state)))
        .route(
            "/{session_ref}",
            get(get_session).route_layer(member(&app_state)),
        )
        .route(
            "/{session_ref}/start-attendance",
            post(start_attendance).route_layer(staff(&app_state)),
        )
        .route(
            "/{session_ref}/qr/refresh",
            post(refresh_qr).route_layer(staff(&app_state)),
        )
        .route(
            "/{session_ref}/end",
            post(end_session).route_layer(staff(&app_state)),
        )
        .route(
            "/{session_ref}/cancel",
            post(cancel_session).route_layer(staff(&app_state)),
        )
        .route(
            "/{session_ref}/attendance/qr",
            post(mark_qr).route_layer(member(&app_state)),
        )
        .route(
            "/{session_ref}/attendance/geolocation",
            post(mark_geolocation).route_layer(member(&app_state)),
        )
        .route(
            "/{session_ref}/attendance/manual",
            post(mark_manual).route_layer(staff(&app_state)),
        )
        .route(
            "/{session_ref}/records",
            get(list_session_records).route_layer(staff(&app_state)),
        )
        .with_state(app_state)
}
