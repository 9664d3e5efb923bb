use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbNotification {
    pub id: i64,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_notification<'e, E: PgExecutor<'e>>(
    exec: E,
    user_id: Uuid,
    title: &str,
    body: &str,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO notifications (user_id, title, body) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(user_id)
    .bind(title)
    .bind(body)
    .fetch_one(exec)
    .await?;
    Ok(id)
}

pub async fn list_notifications(
    pool: &PgPool,
    user_id: Uuid,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<DbNotification>> {
    let notifications = sqlx::query_as::<_, DbNotification>(
        r#"
        SELECT id, user_id, title, body, read_at, created_at
        FROM notifications
        WHERE user_id = $1
          AND ($2 = FALSE OR read_at IS NULL)
        ORDER BY created_at DESC, id DESC
        LIMIT $3
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(notifications)
}

/// Returns false when the notification does not exist or belongs to someone else.
pub async fn mark_read(pool: &PgPool, user_id: Uuid, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE notifications
        SET read_at = COALESCE(read_at, now())
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_all_read(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE notifications SET read_at = now() WHERE user_id = $1 AND read_at IS NULL")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn unread_count(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
