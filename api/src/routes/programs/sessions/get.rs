use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::str::FromStr;
use util::state::AppState;

use super::common::{
    ListQuery, ListResponse, RecordResponse, SessionResponse, error_response,
};
use crate::auth::guards::Empty;
use crate::response::ApiResponse;
use db::models::attendance_record;
use db::models::class_session::{Column as SessionCol, Entity as SessionEntity, SessionStatus};
use services::session::SessionService;

/// GET /api/programs/{program_id}/sessions
///
/// Paged session listing with optional title search, status filter, and
/// sorting on `start_time` or `created_at` (prefix `-` for descending).
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(program_id): Path<i64>,
    Query(params): Query<ListQuery>,
) -> Response {
    let db = state.db();

    let mut query = SessionEntity::find().filter(SessionCol::ProgramId.eq(program_id));

    if let Some(q) = params.q.as_deref().filter(|s| !s.trim().is_empty()) {
        query = query.filter(SessionCol::Title.contains(q));
    }

    if let Some(raw) = params.status.as_deref() {
        match SessionStatus::from_str(raw) {
            Ok(status) => query = query.filter(SessionCol::Status.eq(status)),
            Err(_) => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ApiResponse::<Empty>::error(format!(
                        "Unknown session status '{raw}'"
                    ))),
                )
                    .into_response();
            }
        }
    }

    let sort = params.sort.as_deref().unwrap_or("-start_time");
    let (field, ascending) = match sort.strip_prefix('-') {
        Some(rest) => (rest, false),
        None => (sort, true),
    };
    let column = match field {
        "start_time" => SessionCol::StartTime,
        "created_at" => SessionCol::CreatedAt,
        "title" => SessionCol::Title,
        _ => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse::<Empty>::error(format!(
                    "Unknown sort field '{field}'"
                ))),
            )
                .into_response();
        }
    };
    query = if ascending {
        query.order_by_asc(column)
    } else {
        query.order_by_desc(column)
    };

    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let page = params.page.unwrap_or(1).max(1);

    let paginator = query.paginate(db, per_page);
    let total = match paginator.num_items().await {
        Ok(n) => n,
        Err(e) => return error_response(e.into()),
    };
    let rows = match paginator.fetch_page(page - 1).await {
        Ok(rows) => rows,
        Err(e) => return error_response(e.into()),
    };

    let body = ListResponse {
        sessions: rows.into_iter().map(SessionResponse::from).collect(),
        page,
        per_page,
        total,
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(body, "Sessions retrieved")),
    )
        .into_response()
}

/// GET /api/programs/{program_id}/sessions/{session_ref}
///
/// `session_ref` is either the numeric id or the public session code.
pub async fn get_session(
    State(state): State<AppState>,
    Path((program_id, session_ref)): Path<(i64, String)>,
) -> Response {
    match SessionService::get_in_program(state.db(), program_id, &session_ref).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                SessionResponse::from(session),
                "Session retrieved",
            )),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/programs/{program_id}/sessions/{session_ref}/records
pub async fn list_session_records(
    State(state): State<AppState>,
    Path((program_id, session_ref)): Path<(i64, String)>,
) -> Response {
    let db = state.db();
    let session = match SessionService::get_in_program(db, program_id, &session_ref).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let rows = match attendance_record::Entity::find()
        .filter(attendance_record::Column::SessionId.eq(session.id))
        .order_by_asc(attendance_record::Column::MarkedAt)
        .all(db)
        .await
    {
        Ok(rows) => rows,
        Err(e) => return error_response(e.into()),
    };

    let records: Vec<RecordResponse> = rows.into_iter().map(RecordResponse::from).collect();

    (
        StatusCode::OK,
        Json(ApiResponse::success(records, "Attendance records retrieved")),
    )
        .into_response()
}
