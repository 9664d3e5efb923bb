//! Lesson completion, progress and certificate issuance.
use crate::db;
use crate::db::courses::DbEnrollment;
use crate::domain::progress::{is_complete, progress_percent};
use crate::error::{AppError, AppResult};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub enrollment_id: i64,
    pub lesson_id: i64,
    /// False when the lesson had already been marked complete.
    pub newly_completed: bool,
    pub progress: i32,
    pub completed: bool,
    pub certificate_id: Option<i64>,
}

/// Issues the certificate inside the caller's transaction and notifies the
/// holder, but only the first time.
async fn issue_once(conn: &mut PgConnection, enrollment: &DbEnrollment) -> AppResult<Option<i64>> {
    let issued = db::certificates::issue_certificate(
        &mut *conn,
        enrollment.id,
        enrollment.user_id,
        enrollment.course_id,
    )
    .await?;

    if let Some(certificate_id) = issued {
        db::notifications::insert_notification(
            &mut *conn,
            enrollment.user_id,
            "Course completed",
            &format!(
                "Congratulations on finishing \"{}\". Your certificate is ready.",
                enrollment.course_title
            ),
        )
        .await?;
        tracing::info!(
            "Issued certificate {} for enrollment {}",
            certificate_id,
            enrollment.id
        );
    }
    Ok(issued)
}

pub async fn complete_lesson(
    pool: &PgPool,
    user_id: Uuid,
    enrollment_id: i64,
    lesson_id: i64,
) -> AppResult<ProgressUpdate> {
    let mut tx = pool.begin().await?;

    let enrollment = db::courses::lock_enrollment(&mut tx, enrollment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("enrollment {enrollment_id}")))?;
    if enrollment.user_id != user_id {
        return Err(AppError::Forbidden(
            "enrollment belongs to another user".to_string(),
        ));
    }

    let course_id = db::courses::lesson_course_id(&mut *tx, lesson_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("lesson {lesson_id}")))?;
    if course_id != enrollment.course_id {
        return Err(AppError::validation(format!(
            "lesson {lesson_id} is not part of course {}",
            enrollment.course_id
        )));
    }

    let newly_completed = db::courses::record_lesson_completion(&mut tx, enrollment.id, lesson_id).await?;
    let (completed, total) = db::courses::lesson_counts(&mut tx, enrollment.id, enrollment.course_id).await?;
    let progress = progress_percent(completed, total);
    let done = is_complete(completed, total);
    db::courses::set_progress(&mut tx, enrollment.id, progress, done).await?;

    let certificate_id = if done {
        issue_once(&mut tx, &enrollment).await?
    } else {
        None
    };

    tx.commit().await?;

    Ok(ProgressUpdate {
        enrollment_id: enrollment.id,
        lesson_id,
        newly_completed,
        progress,
        completed: done,
        certificate_id,
    })
}

/// Manual issuance for an enrollment that is already complete. Idempotent.
pub async fn issue_certificate(pool: &PgPool, enrollment_id: i64) -> AppResult<db::certificates::DbCertificate> {
    let mut tx = pool.begin().await?;
    let enrollment = db::courses::lock_enrollment(&mut tx, enrollment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("enrollment {enrollment_id}")))?;
    if enrollment.completed_at.is_none() {
        return Err(AppError::validation(format!(
            "enrollment {enrollment_id} has not been completed"
        )));
    }
    issue_once(&mut tx, &enrollment).await?;
    tx.commit().await?;

    db::certificates::find_by_enrollment(pool, enrollment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("certificate for enrollment {enrollment_id}")))
}
