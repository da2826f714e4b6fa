//! Live attendance feed for a single session.
//!
//! Subscribers receive every event the services emit on the session topic
//! (marks, counter updates, lifecycle changes). The socket answers app-level
//! `{"type":"ping"}` frames so dashboards can keep connections warm.

use axum::{
    Extension, Json,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use util::state::AppState;

use crate::auth::AuthUser;
use crate::auth::guards::Empty;
use crate::response::ApiResponse;
use db::models::class_session;
use db::models::program_enrollment;
use services::attendance::session_topic;

pub async fn attendance_session_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Path(session_id): Path<i64>,
) -> Response {
    let db = app_state.db();

    let session = match class_session::Entity::find_by_id(session_id).one(db).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<Empty>::error("Session not found")),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, session_id, "Failed to load session for WS subscribe");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Empty>::error("Internal server error")),
            )
                .into_response();
        }
    };

    // Any enrolled member of the program may watch the feed; admins always can.
    if !claims.admin {
        let enrolled = program_enrollment::Entity::find()
            .filter(program_enrollment::Column::UserId.eq(claims.sub))
            .filter(program_enrollment::Column::ProgramId.eq(session.program_id))
            .one(db)
            .await
            .ok()
            .flatten()
            .is_some();
        if !enrolled {
            return (
                StatusCode::FORBIDDEN,
                Json(ApiResponse::<Empty>::error(
                    "Not enrolled in this session's program",
                )),
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| serve_session_socket(socket, app_state, session_id))
}

async fn serve_session_socket(mut socket: WebSocket, app_state: AppState, session_id: i64) {
    let topic = session_topic(session_id);
    let mut rx = app_state.ws().subscribe(&topic).await;

    loop {
        tokio::select! {
            broadcastable = rx.recv() => match broadcastable {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %topic, skipped, "WS subscriber lagged; dropping events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let is_ping = serde_json::from_str::<serde_json::Value>(&text)
                        .ok()
                        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
                        .unwrap_or(false);
                    if is_ping {
                        let pong = json!({
                            "type": "pong",
                            "topic": topic,
                            "ts": chrono::Utc::now().to_rfc3339(),
                        });
                        if socket.send(Message::Text(pong.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}
