use crate::db::{self, DbRole};
use crate::domain::permissions::{is_known_permission, Requirement, CATALOGUE, ROLE_ADMIN, ROLE_MANAGE};
use crate::error::{AppError, AppResult};
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: DbRole,
    pub permissions: Vec<String>,
}

fn requirement() -> Requirement {
    Requirement::permission(ROLE_MANAGE).or_role(ROLE_ADMIN)
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/permissions", get(list_permissions))
        .route("/:id", get(get_role).put(update_role).delete(delete_role))
        .with_state(state)
}

/// Sorted, de-duplicated permission list; anything outside the catalogue is rejected.
fn validated_permissions(raw: &[String]) -> AppResult<Vec<String>> {
    let mut permissions: Vec<String> = raw.iter().map(|p| p.trim().to_string()).collect();
    if let Some(unknown) = permissions.iter().find(|p| !is_known_permission(p)) {
        return Err(AppError::validation(format!("unknown permission {unknown}")));
    }
    permissions.sort();
    permissions.dedup();
    Ok(permissions)
}

async fn list_permissions(UserSession(principal): UserSession) -> AppResult<Json<Vec<&'static str>>> {
    principal.authorize(&requirement())?;
    Ok(Json(CATALOGUE.iter().copied().collect()))
}

async fn list_roles(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<DbRole>>> {
    principal.authorize(&requirement())?;
    Ok(Json(db::list_roles(&state.pool).await?))
}

async fn get_role(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<RoleDetail>> {
    principal.authorize(&requirement())?;
    let role = db::find_role_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("role {id}")))?;
    let permissions = db::role_permissions(&state.pool, role.id).await?;
    Ok(Json(RoleDetail { role, permissions }))
}

async fn create_role(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<CreateRoleRequest>,
) -> AppResult<(StatusCode, Json<RoleDetail>)> {
    principal.authorize(&requirement())?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("role name is required"));
    }
    let permissions = validated_permissions(&payload.permissions)?;
    if db::find_role_by_name(&state.pool, name).await?.is_some() {
        return Err(AppError::Conflict(format!("role {name} already exists")));
    }

    let role = db::create_role(&state.pool, name, payload.description.trim(), &permissions).await?;
    tracing::info!("Role {} created by {}", role.name, principal.user_id);
    Ok((StatusCode::CREATED, Json(RoleDetail { role, permissions })))
}

async fn update_role(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<RoleDetail>> {
    principal.authorize(&requirement())?;

    let permissions = payload
        .permissions
        .as_deref()
        .map(validated_permissions)
        .transpose()?;
    db::find_role_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("role {id}")))?;

    db::update_role(
        &state.pool,
        id,
        payload.description.as_deref().map(str::trim),
        permissions.as_deref(),
    )
    .await?;

    let role = db::find_role_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("role {id}")))?;
    let permissions = db::role_permissions(&state.pool, id).await?;
    tracing::info!("Role {} updated by {}", role.name, principal.user_id);
    Ok(Json(RoleDetail { role, permissions }))
}

async fn delete_role(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&requirement())?;

    let in_use = db::count_users_with_role(&state.pool, id).await?;
    if in_use > 0 {
        return Err(AppError::Conflict(format!(
            "role is assigned to {in_use} user(s)"
        )));
    }
    if !db::delete_role(&state.pool, id).await? {
        return Err(AppError::not_found(format!("role {id}")));
    }
    tracing::info!("Role {} deleted by {}", id, principal.user_id);
    Ok(StatusCode::NO_CONTENT)
}
