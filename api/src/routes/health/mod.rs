use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use util::state::AppState;

use crate::response::ApiResponse;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/", get(health))
}

/// GET /api/health
///
/// Liveness probe. Reports the service name and whether the database
/// connection answers a ping.
async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<ApiResponse<Value>> {
    let db_ok = state.db().ping().await.is_ok();
    Json(ApiResponse::success(
        json!({
            "service": util::config::project_name(),
            "database": if db_ok { "up" } else { "down" },
        }),
        "Service is running",
    ))
}
