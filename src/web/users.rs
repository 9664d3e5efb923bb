use crate::db::{self, UserSummary};
use crate::domain::permissions::{Requirement, ROLE_CONSULTANT, USER_MANAGE, USER_READ};
use crate::error::{AppError, AppResult};
use crate::state::SharedState;
use crate::time_utils::normalize_timezone;
use crate::web::auth::{hash_password, password_matches};
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserSummary,
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: String,
    pub timezone: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current: String,
    pub new: String,
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: Option<i64>,
}

#[derive(Serialize)]
pub struct ConsultantEntry {
    pub id: Uuid,
    pub full_name: String,
    pub timezone: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/me", get(me).put(update_me))
        .route("/me/password", put(change_password))
        .route("/consultants", get(list_consultants))
        .route("/:id/role", put(assign_role))
        .route("/:id/deactivate", post(deactivate_user))
        .route("/:id/activate", post(activate_user))
        .with_state(state)
}

async fn me(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<MeResponse>> {
    let user = db::get_user_summary(&state.pool, principal.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    Ok(Json(MeResponse {
        user,
        permissions: principal.permissions(),
    }))
}

async fn update_me(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<StatusCode> {
    let full_name = payload.full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::validation("full_name is required"));
    }
    let timezone = match payload.timezone.as_deref() {
        Some(raw) => normalize_timezone(raw)
            .ok_or_else(|| AppError::validation(format!("unknown timezone {raw}")))?,
        None => db::find_user_by_id(&state.pool, principal.user_id)
            .await?
            .map(|u| u.timezone)
            .unwrap_or_else(|| "UTC".to_string()),
    };
    db::update_profile(&state.pool, principal.user_id, full_name, &timezone).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    let user = db::find_user_by_id(&state.pool, principal.user_id)
        .await?
        .ok_or(AppError::Unauthenticated)?;
    if !password_matches(&payload.current, &user.hash) {
        return Err(AppError::Forbidden("current password is incorrect".to_string()));
    }
    let hash = hash_password(&payload.new)?;
    db::update_password_hash(&state.pool, user.id, &hash).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<UserSummary>>> {
    principal.authorize(&Requirement::permission(USER_READ).or_permission(USER_MANAGE))?;
    Ok(Json(db::list_users(&state.pool).await?))
}

async fn list_consultants(
    UserSession(_principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<ConsultantEntry>>> {
    let consultants = db::list_users_with_role(&state.pool, ROLE_CONSULTANT)
        .await?
        .into_iter()
        .map(|u| ConsultantEntry {
            id: u.id,
            full_name: u.full_name,
            timezone: u.timezone,
        })
        .collect();
    Ok(Json(consultants))
}

async fn assign_role(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AssignRoleRequest>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(USER_MANAGE))?;

    if let Some(role_id) = payload.role_id {
        db::find_role_by_id(&state.pool, role_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role {role_id}")))?;
    }
    if !db::set_user_role(&state.pool, user_id, payload.role_id).await? {
        return Err(AppError::not_found(format!("user {user_id}")));
    }

    tracing::info!(
        "User {} assigned role {:?} to {}",
        principal.user_id,
        payload.role_id,
        user_id
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn set_active(state: &SharedState, principal_id: Uuid, user_id: Uuid, active: bool) -> AppResult<StatusCode> {
    if principal_id == user_id && !active {
        return Err(AppError::validation("you cannot deactivate your own account"));
    }
    if !db::set_user_active(&state.pool, user_id, active).await? {
        return Err(AppError::not_found(format!("user {user_id}")));
    }
    tracing::info!("User {} set active={} by {}", user_id, active, principal_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn deactivate_user(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(USER_MANAGE))?;
    set_active(&state, principal.user_id, user_id, false).await
}

async fn activate_user(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(USER_MANAGE))?;
    set_active(&state, principal.user_id, user_id, true).await
}
