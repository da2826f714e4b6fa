pub mod models;
pub mod test_utils;

use sea_orm::{Database, DatabaseConnection};
use std::path::Path;
use util::config;

/// Connects using `DATABASE_PATH`, which may be a full DSN or a bare SQLite
/// file path. Bare paths get their parent directory created first, since
/// SQLite will not create intermediate directories itself.
pub async fn connect() -> DatabaseConnection {
    let path_or_url = config::database_path();
    let is_dsn = path_or_url.contains("://") || path_or_url.starts_with("sqlite:");
    let url = if is_dsn {
        path_or_url
    } else {
        if let Some(parent) = Path::new(&path_or_url).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        format!("sqlite://{path_or_url}?mode=rwc")
    };

    tracing::info!("Connecting to database");
    Database::connect(&url)
        .await
        .expect("Failed to connect to database")
}
