pub mod appointments;
pub mod certificates;
pub mod courses;
pub mod notifications;
pub mod surveys;

use crate::domain::permissions::RoleGrant;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub email: String,
    pub hash: String,
    pub full_name: String,
    pub role_id: Option<i64>,
    pub email_verified: bool,
    pub is_active: bool,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbRole {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// User row joined with the role name, for listings.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role_id: Option<i64>,
    pub role_name: Option<String>,
    pub email_verified: bool,
    pub is_active: bool,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

const USER_COLUMNS: &str =
    "id, email, hash, full_name, role_id, email_verified, is_active, timezone, created_at";

const SUMMARY_SELECT: &str = r#"
    SELECT u.id, u.email, u.full_name, u.role_id, r.name AS role_name,
           u.email_verified, u.is_active, u.timezone, u.created_at
    FROM users u
    LEFT JOIN roles r ON r.id = u.role_id
"#;

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn insert_user(
    pool: &PgPool,
    email: &str,
    hash: &str,
    full_name: &str,
    role_id: Option<i64>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users (id, email, hash, full_name, role_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(email)
    .bind(hash)
    .bind(full_name)
    .bind(role_id)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn mark_email_verified(pool: &PgPool, user_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_password_hash(pool: &PgPool, user_id: Uuid, hash: &str) -> Result<()> {
    sqlx::query("UPDATE users SET hash = $2, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(hash)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_profile(pool: &PgPool, user_id: Uuid, full_name: &str, timezone: &str) -> Result<()> {
    sqlx::query("UPDATE users SET full_name = $2, timezone = $3, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(full_name)
        .bind(timezone)
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns false when the user does not exist.
pub async fn set_user_role(pool: &PgPool, user_id: Uuid, role_id: Option<i64>) -> Result<bool> {
    let result = sqlx::query("UPDATE users SET role_id = $2, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(role_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_user_active(pool: &PgPool, user_id: Uuid, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(active)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_user_summary(pool: &PgPool, user_id: Uuid) -> Result<Option<UserSummary>> {
    let user = sqlx::query_as::<_, UserSummary>(&format!("{SUMMARY_SELECT} WHERE u.id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn list_users(pool: &PgPool) -> Result<Vec<UserSummary>> {
    let users = sqlx::query_as::<_, UserSummary>(&format!("{SUMMARY_SELECT} ORDER BY u.created_at"))
        .fetch_all(pool)
        .await?;
    Ok(users)
}

pub async fn list_users_with_role(pool: &PgPool, role_name: &str) -> Result<Vec<UserSummary>> {
    let users = sqlx::query_as::<_, UserSummary>(&format!(
        "{SUMMARY_SELECT} WHERE r.name = $1 AND u.is_active ORDER BY u.full_name"
    ))
    .bind(role_name)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

// ========== Roles & permissions ==========

pub async fn list_roles(pool: &PgPool) -> Result<Vec<DbRole>> {
    let roles = sqlx::query_as::<_, DbRole>("SELECT id, name, description, created_at FROM roles ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(roles)
}

pub async fn find_role_by_id(pool: &PgPool, id: i64) -> Result<Option<DbRole>> {
    let role = sqlx::query_as::<_, DbRole>("SELECT id, name, description, created_at FROM roles WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(role)
}

pub async fn find_role_by_name(pool: &PgPool, name: &str) -> Result<Option<DbRole>> {
    let role = sqlx::query_as::<_, DbRole>("SELECT id, name, description, created_at FROM roles WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(role)
}

pub async fn role_permissions(pool: &PgPool, role_id: i64) -> Result<Vec<String>> {
    let perms = sqlx::query_scalar::<_, String>(
        "SELECT permission FROM role_permissions WHERE role_id = $1 ORDER BY permission",
    )
    .bind(role_id)
    .fetch_all(pool)
    .await?;
    Ok(perms)
}

/// Resolves a user's role into the form the authorization check consumes.
pub async fn load_role_grant(pool: &PgPool, role_id: i64) -> Result<Option<RoleGrant>> {
    let Some(role) = find_role_by_id(pool, role_id).await? else {
        return Ok(None);
    };
    let permissions = role_permissions(pool, role.id).await?;
    Ok(Some(RoleGrant {
        id: role.id,
        name: role.name,
        permissions: permissions.into_iter().collect(),
    }))
}

pub async fn create_role(pool: &PgPool, name: &str, description: &str, permissions: &[String]) -> Result<DbRole> {
    let mut tx = pool.begin().await?;
    let role = sqlx::query_as::<_, DbRole>(
        r#"
        INSERT INTO roles (name, description)
        VALUES ($1, $2)
        RETURNING id, name, description, created_at
        "#,
    )
    .bind(name)
    .bind(description)
    .fetch_one(&mut *tx)
    .await?;

    for permission in permissions {
        sqlx::query("INSERT INTO role_permissions (role_id, permission) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(role.id)
            .bind(permission)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(role)
}

pub async fn update_role(
    pool: &PgPool,
    role_id: i64,
    description: Option<&str>,
    permissions: Option<&[String]>,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    if let Some(description) = description {
        sqlx::query("UPDATE roles SET description = $2 WHERE id = $1")
            .bind(role_id)
            .bind(description)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(permissions) = permissions {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        for permission in permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, permission) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(role_id)
                .bind(permission)
                .execute(&mut *tx)
                .await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

pub async fn count_users_with_role(pool: &PgPool, role_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role_id = $1")
        .bind(role_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn delete_role(pool: &PgPool, role_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(role_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
