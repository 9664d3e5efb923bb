use crate::db;
use crate::domain::appointments::{AppointmentAction, AppointmentStatus};
use crate::error::{AppError, AppResult};
use crate::services::appointments::{self, party_of, AppointmentView, BookingRequest};
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

#[derive(Serialize)]
pub struct StatusChange {
    pub id: i64,
    pub status: AppointmentStatus,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_appointments).post(book_appointment))
        .route("/:id", get(get_appointment))
        .route("/:id/confirm", post(confirm))
        .route("/:id/cancel", post(cancel))
        .route("/:id/complete", post(complete))
        .with_state(state)
}

async fn book_appointment(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<BookingRequest>,
) -> AppResult<(StatusCode, Json<AppointmentView>)> {
    let id = appointments::book(&state.pool, &state.crypto, &principal, &payload).await?;
    let row = db::appointments::find_appointment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("appointment {id}")))?;
    Ok((StatusCode::CREATED, Json(AppointmentView::from_row(row, &state.crypto))))
}

async fn list_appointments(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<AppointmentView>>> {
    let rows = db::appointments::list_for_user(&state.pool, principal.user_id).await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| AppointmentView::from_row(row, &state.crypto))
            .collect(),
    ))
}

async fn get_appointment(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<AppointmentView>> {
    let row = db::appointments::find_appointment(&state.pool, id)
        .await?
        .filter(|row| party_of(&principal, row).is_some())
        .ok_or_else(|| AppError::not_found(format!("appointment {id}")))?;
    Ok(Json(AppointmentView::from_row(row, &state.crypto)))
}

async fn act(state: &SharedState, session: UserSession, id: i64, action: AppointmentAction) -> AppResult<Json<StatusChange>> {
    let UserSession(principal) = session;
    let status = appointments::apply_action(&state.pool, &principal, id, action).await?;
    tracing::info!("Appointment {} {} by {}", id, status.as_str(), principal.user_id);
    Ok(Json(StatusChange { id, status }))
}

async fn confirm(session: UserSession, State(state): State<SharedState>, Path(id): Path<i64>) -> AppResult<Json<StatusChange>> {
    act(&state, session, id, AppointmentAction::Confirm).await
}

async fn cancel(session: UserSession, State(state): State<SharedState>, Path(id): Path<i64>) -> AppResult<Json<StatusChange>> {
    act(&state, session, id, AppointmentAction::Cancel).await
}

async fn complete(session: UserSession, State(state): State<SharedState>, Path(id): Path<i64>) -> AppResult<Json<StatusChange>> {
    act(&state, session, id, AppointmentAction::Complete).await
}
