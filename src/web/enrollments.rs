use crate::db::{self, courses::DbEnrollment};
use crate::error::{AppError, AppResult};
use crate::services::enrollments::{complete_lesson, ProgressUpdate};
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct EnrollRequest {
    pub course_id: i64,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_enrollments).post(enroll))
        .route("/:id", get(get_enrollment))
        .route("/:id/lessons/:lesson_id/complete", post(mark_lesson_complete))
        .with_state(state)
}

async fn enroll(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<EnrollRequest>,
) -> AppResult<(StatusCode, Json<DbEnrollment>)> {
    let course = db::courses::find_course(&state.pool, payload.course_id)
        .await?
        .filter(|c| c.published)
        .ok_or_else(|| AppError::not_found(format!("course {}", payload.course_id)))?;

    // A duplicate hits the (user, course) unique constraint and surfaces as 409.
    let id = db::courses::insert_enrollment(&state.pool, principal.user_id, course.id).await?;
    let enrollment = db::courses::find_enrollment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("enrollment {id}")))?;

    tracing::info!("User {} enrolled in course {}", principal.user_id, course.id);
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn list_enrollments(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<DbEnrollment>>> {
    Ok(Json(
        db::courses::list_enrollments_for_user(&state.pool, principal.user_id).await?,
    ))
}

async fn get_enrollment(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<DbEnrollment>> {
    db::courses::find_enrollment(&state.pool, id)
        .await?
        .filter(|e| e.user_id == principal.user_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("enrollment {id}")))
}

async fn mark_lesson_complete(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path((enrollment_id, lesson_id)): Path<(i64, i64)>,
) -> AppResult<Json<ProgressUpdate>> {
    let update = complete_lesson(&state.pool, principal.user_id, enrollment_id, lesson_id).await?;
    Ok(Json(update))
}
