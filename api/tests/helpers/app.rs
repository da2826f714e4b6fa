use axum::{Extension, Router, extract::connect_info::MockConnectInfo};
use std::net::SocketAddr;
use std::sync::Once;

use api::{routes::routes, ws::ws_routes};
use services::qr::QrService;
use util::{state::AppState, ws::WebSocketManager};

static ENV_INIT: Once = Once::new();

/// Points required configuration at test values before the config singleton
/// loads. Every test goes through here first.
fn init_test_env() {
    ENV_INIT.call_once(|| {
        unsafe {
            std::env::set_var("DATABASE_PATH", "sqlite::memory:");
            std::env::set_var("JWT_SECRET", "integration-test-jwt-secret");
            std::env::set_var("JWT_DURATION_MINUTES", "30");
            std::env::set_var("ATTENDANCE_SECRET", "integration-test-attendance-secret");
            std::env::set_var("LOG_TO_STDOUT", "false");
        }
        let _unused = util::config::AppConfig::global();
    });
}

/// Builds the full application router against a fresh in-memory database.
///
/// Returns the router, the state (for seeding), and the QR service that the
/// router's handlers share, so tests can issue challenges out-of-band.
pub async fn make_test_app() -> (Router, AppState, QrService) {
    init_test_env();

    let db = db::test_utils::setup_test_db().await;
    let app_state = AppState::new(db, WebSocketManager::new());
    let qr = QrService::with_in_memory_store(util::config::attendance_secret());

    let router = Router::new()
        .nest("/api", routes(app_state.clone()))
        .nest("/ws", ws_routes(app_state.clone()))
        .layer(Extension(qr.clone()))
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

    (router, app_state, qr)
}
