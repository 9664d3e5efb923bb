use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbCertificate {
    pub id: i64,
    pub enrollment_id: i64,
    pub user_id: Uuid,
    pub course_id: i64,
    pub course_title: String,
    pub holder_name: String,
    pub verification_code: Uuid,
    pub issued_at: DateTime<Utc>,
}

const CERTIFICATE_SELECT: &str = r#"
    SELECT c.id, c.enrollment_id, c.user_id, c.course_id, co.title AS course_title,
           u.full_name AS holder_name, c.verification_code, c.issued_at
    FROM certificates c
    JOIN courses co ON co.id = c.course_id
    JOIN users u ON u.id = c.user_id
"#;

/// Issues the certificate for an enrollment once; returns the id of a new
/// certificate, or `None` if one already existed.
pub async fn issue_certificate(
    conn: &mut PgConnection,
    enrollment_id: i64,
    user_id: Uuid,
    course_id: i64,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO certificates (enrollment_id, user_id, course_id, verification_code)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (enrollment_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(enrollment_id)
    .bind(user_id)
    .bind(course_id)
    .bind(Uuid::new_v4())
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<DbCertificate>> {
    let certificates = sqlx::query_as::<_, DbCertificate>(&format!(
        "{CERTIFICATE_SELECT} WHERE c.user_id = $1 ORDER BY c.issued_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(certificates)
}

pub async fn find_by_code(pool: &PgPool, code: Uuid) -> Result<Option<DbCertificate>> {
    let certificate = sqlx::query_as::<_, DbCertificate>(&format!(
        "{CERTIFICATE_SELECT} WHERE c.verification_code = $1"
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(certificate)
}

pub async fn find_by_enrollment(pool: &PgPool, enrollment_id: i64) -> Result<Option<DbCertificate>> {
    let certificate = sqlx::query_as::<_, DbCertificate>(&format!(
        "{CERTIFICATE_SELECT} WHERE c.enrollment_id = $1"
    ))
    .bind(enrollment_id)
    .fetch_optional(pool)
    .await?;
    Ok(certificate)
}
