use crate::domain::appointments::AppointmentStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct DbAppointment {
    pub id: i64,
    pub client_id: Uuid,
    pub client_name: String,
    pub client_timezone: String,
    pub consultant_id: Uuid,
    pub consultant_name: String,
    pub consultant_timezone: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub enc_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT a.id, a.client_id, cl.full_name AS client_name, cl.timezone AS client_timezone,
           a.consultant_id, co.full_name AS consultant_name, co.timezone AS consultant_timezone,
           a.starts_at, a.ends_at, a.status, a.enc_notes, a.created_at
    FROM appointments a
    JOIN users cl ON cl.id = a.client_id
    JOIN users co ON co.id = a.consultant_id
"#;

/// Serialises bookings per consultant for the rest of the transaction.
pub async fn lock_consultant(conn: &mut PgConnection, consultant_id: Uuid) -> Result<()> {
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(consultant_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// True when the consultant already has a non-cancelled appointment
/// intersecting `[starts_at, ends_at)`.
pub async fn has_overlap(
    conn: &mut PgConnection,
    consultant_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<bool> {
    let overlap = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM appointments
            WHERE consultant_id = $1
              AND status <> 'cancelled'
              AND starts_at < $3
              AND ends_at > $2
        )
        "#,
    )
    .bind(consultant_id)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_one(conn)
    .await?;
    Ok(overlap)
}

pub async fn insert_appointment(
    conn: &mut PgConnection,
    client_id: Uuid,
    consultant_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    enc_notes: Option<&str>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO appointments (client_id, consultant_id, starts_at, ends_at, enc_notes)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(client_id)
    .bind(consultant_id)
    .bind(starts_at)
    .bind(ends_at)
    .bind(enc_notes)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

pub async fn find_appointment(pool: &PgPool, id: i64) -> Result<Option<DbAppointment>> {
    let appointment = sqlx::query_as::<_, DbAppointment>(&format!("{APPOINTMENT_SELECT} WHERE a.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(appointment)
}

/// Appointments where the user is either the client or the consultant.
pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<DbAppointment>> {
    let appointments = sqlx::query_as::<_, DbAppointment>(&format!(
        "{APPOINTMENT_SELECT} WHERE a.client_id = $1 OR a.consultant_id = $1 ORDER BY a.starts_at"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(appointments)
}

/// Compare-and-set on the status column; false when another request moved
/// the appointment first.
pub async fn update_status(
    pool: &PgPool,
    id: i64,
    expected: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE appointments SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(expected)
    .bind(next)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Claims upcoming appointments that have not been reminded yet.
pub async fn claim_due_reminders(pool: &PgPool, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<DbAppointment>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE appointments
        SET reminded = TRUE
        WHERE NOT reminded
          AND status IN ('pending', 'confirmed')
          AND starts_at > $1
          AND starts_at <= $2
        RETURNING id
        "#,
    )
    .bind(now)
    .bind(until)
    .fetch_all(pool)
    .await?;

    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let appointments = sqlx::query_as::<_, DbAppointment>(&format!(
        "{APPOINTMENT_SELECT} WHERE a.id = ANY($1) ORDER BY a.starts_at"
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;
    Ok(appointments)
}
