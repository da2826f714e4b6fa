//! HTTP route entry point for `/api/...`.
//!
//! Route groups:
//! - `/health` → Health check endpoint (public)
//! - `/auth` → Authentication endpoints (login, public)
//! - `/programs/{program_id}/sessions` → Session lifecycle and attendance
//!   marking (enrolled users; management endpoints gated per route)

use crate::routes::{auth::auth_routes, health::health_routes, programs::program_routes};
use axum::Router;
use util::state::AppState;

pub mod auth;
pub mod health;
pub mod programs;

/// Builds the complete application router for all HTTP endpoints.
///
/// State is applied here, so the returned router nests directly into the
/// top-level server router.
pub fn routes(app_state: AppState) -> Router {
    Router::new()
        .nest("/health", health_routes())
        .nest("/auth", auth_routes())
        .nest("/programs", program_routes(app_state.clone()))
        .with_state(app_state)
}
