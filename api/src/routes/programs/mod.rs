use axum::Router;
use util::state::AppState;

pub mod sessions;

use sessions::session_routes;

pub fn program_routes(app_state: AppState) -> Router<AppState> {
    Router::new().nest("/{program_id}/sessions", session_routes(app_state))
}
