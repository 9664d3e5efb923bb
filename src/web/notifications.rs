use crate::db::{self, notifications::DbNotification};
use crate::error::{AppError, AppResult};
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(read_all))
        .route("/:id/read", post(read_one))
        .with_state(state)
}

async fn list(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<DbNotification>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let notifications =
        db::notifications::list_notifications(&state.pool, principal.user_id, query.unread_only, limit).await?;
    Ok(Json(notifications))
}

async fn read_one(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    if !db::notifications::mark_read(&state.pool, principal.user_id, id).await? {
        return Err(AppError::not_found(format!("notification {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn read_all(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<MarkedRead>> {
    let updated = db::notifications::mark_all_read(&state.pool, principal.user_id).await?;
    Ok(Json(MarkedRead { updated }))
}

async fn unread_count(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<UnreadCount>> {
    let unread = db::notifications::unread_count(&state.pool, principal.user_id).await?;
    Ok(Json(UnreadCount { unread }))
}
