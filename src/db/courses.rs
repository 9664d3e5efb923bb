use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{types::Json, FromRow, PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbCourse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub published: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbModule {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbLesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub content: String,
    pub position: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbQuiz {
    pub id: i64,
    pub lesson_id: i64,
    pub question: String,
    pub options: Json<Vec<String>>,
    pub correct_index: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbEnrollment {
    pub id: i64,
    pub user_id: Uuid,
    pub course_id: i64,
    pub course_title: String,
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const COURSE_COLUMNS: &str = "id, title, description, published, created_by, created_at, updated_at";

const ENROLLMENT_SELECT: &str = r#"
    SELECT e.id, e.user_id, e.course_id, c.title AS course_title,
           e.progress, e.completed_at, e.created_at
    FROM enrollments e
    JOIN courses c ON c.id = e.course_id
"#;

// ========== Courses ==========

pub async fn list_courses(pool: &PgPool, include_unpublished: bool) -> Result<Vec<DbCourse>> {
    let courses = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE published OR $1 ORDER BY created_at DESC"
    ))
    .bind(include_unpublished)
    .fetch_all(pool)
    .await?;
    Ok(courses)
}

pub async fn find_course(pool: &PgPool, id: i64) -> Result<Option<DbCourse>> {
    let course = sqlx::query_as::<_, DbCourse>(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(course)
}

pub async fn insert_course(pool: &PgPool, title: &str, description: &str, created_by: Uuid) -> Result<DbCourse> {
    let course = sqlx::query_as::<_, DbCourse>(&format!(
        "INSERT INTO courses (title, description, created_by) VALUES ($1, $2, $3) RETURNING {COURSE_COLUMNS}"
    ))
    .bind(title)
    .bind(description)
    .bind(created_by)
    .fetch_one(pool)
    .await?;
    Ok(course)
}

pub async fn update_course(pool: &PgPool, id: i64, title: &str, description: &str) -> Result<Option<DbCourse>> {
    let course = sqlx::query_as::<_, DbCourse>(&format!(
        r#"
        UPDATE courses SET title = $2, description = $3, updated_at = now()
        WHERE id = $1
        RETURNING {COURSE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(title)
    .bind(description)
    .fetch_optional(pool)
    .await?;
    Ok(course)
}

pub async fn set_published(pool: &PgPool, id: i64, published: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE courses SET published = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(published)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_course(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ========== Modules, lessons, quizzes ==========

pub async fn list_modules(pool: &PgPool, course_id: i64) -> Result<Vec<DbModule>> {
    let modules = sqlx::query_as::<_, DbModule>(
        "SELECT id, course_id, title, position FROM course_modules WHERE course_id = $1 ORDER BY position, id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    Ok(modules)
}

pub async fn insert_module(pool: &PgPool, course_id: i64, title: &str, position: i32) -> Result<DbModule> {
    let module = sqlx::query_as::<_, DbModule>(
        r#"
        INSERT INTO course_modules (course_id, title, position)
        VALUES ($1, $2, $3)
        RETURNING id, course_id, title, position
        "#,
    )
    .bind(course_id)
    .bind(title)
    .bind(position)
    .fetch_one(pool)
    .await?;
    Ok(module)
}

pub async fn delete_module(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM course_modules WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn module_exists(pool: &PgPool, id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM course_modules WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

pub async fn list_lessons_for_course(pool: &PgPool, course_id: i64) -> Result<Vec<DbLesson>> {
    let lessons = sqlx::query_as::<_, DbLesson>(
        r#"
        SELECT l.id, l.module_id, l.title, l.content, l.position
        FROM lessons l
        JOIN course_modules m ON m.id = l.module_id
        WHERE m.course_id = $1
        ORDER BY m.position, m.id, l.position, l.id
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    Ok(lessons)
}

pub async fn insert_lesson(pool: &PgPool, module_id: i64, title: &str, content: &str, position: i32) -> Result<DbLesson> {
    let lesson = sqlx::query_as::<_, DbLesson>(
        r#"
        INSERT INTO lessons (module_id, title, content, position)
        VALUES ($1, $2, $3, $4)
        RETURNING id, module_id, title, content, position
        "#,
    )
    .bind(module_id)
    .bind(title)
    .bind(content)
    .bind(position)
    .fetch_one(pool)
    .await?;
    Ok(lesson)
}

pub async fn delete_lesson(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM lessons WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Course that owns a lesson, if the lesson exists.
pub async fn lesson_course_id<'e, E: PgExecutor<'e>>(exec: E, lesson_id: i64) -> Result<Option<i64>> {
    let course_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT m.course_id
        FROM lessons l
        JOIN course_modules m ON m.id = l.module_id
        WHERE l.id = $1
        "#,
    )
    .bind(lesson_id)
    .fetch_optional(exec)
    .await?;
    Ok(course_id)
}

pub async fn list_quizzes_for_course(pool: &PgPool, course_id: i64) -> Result<Vec<DbQuiz>> {
    let quizzes = sqlx::query_as::<_, DbQuiz>(
        r#"
        SELECT q.id, q.lesson_id, q.question, q.options, q.correct_index
        FROM quizzes q
        JOIN lessons l ON l.id = q.lesson_id
        JOIN course_modules m ON m.id = l.module_id
        WHERE m.course_id = $1
        ORDER BY q.id
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    Ok(quizzes)
}

pub async fn find_quiz(pool: &PgPool, id: i64) -> Result<Option<DbQuiz>> {
    let quiz = sqlx::query_as::<_, DbQuiz>(
        "SELECT id, lesson_id, question, options, correct_index FROM quizzes WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(quiz)
}

pub async fn insert_quiz(
    pool: &PgPool,
    lesson_id: i64,
    question: &str,
    options: &[String],
    correct_index: i32,
) -> Result<DbQuiz> {
    let quiz = sqlx::query_as::<_, DbQuiz>(
        r#"
        INSERT INTO quizzes (lesson_id, question, options, correct_index)
        VALUES ($1, $2, $3, $4)
        RETURNING id, lesson_id, question, options, correct_index
        "#,
    )
    .bind(lesson_id)
    .bind(question)
    .bind(Json(options))
    .bind(correct_index)
    .fetch_one(pool)
    .await?;
    Ok(quiz)
}

pub async fn delete_quiz(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_quiz_attempt(
    pool: &PgPool,
    quiz_id: i64,
    user_id: Uuid,
    selected_index: i32,
    correct: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO quiz_attempts (quiz_id, user_id, selected_index, correct)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(quiz_id)
    .bind(user_id)
    .bind(selected_index)
    .bind(correct)
    .execute(pool)
    .await?;
    Ok(())
}

// ========== Enrollments & progress ==========

pub async fn insert_enrollment(pool: &PgPool, user_id: Uuid, course_id: i64) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO enrollments (user_id, course_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn find_enrollment(pool: &PgPool, id: i64) -> Result<Option<DbEnrollment>> {
    let enrollment = sqlx::query_as::<_, DbEnrollment>(&format!("{ENROLLMENT_SELECT} WHERE e.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(enrollment)
}

pub async fn list_enrollments_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<DbEnrollment>> {
    let enrollments = sqlx::query_as::<_, DbEnrollment>(&format!(
        "{ENROLLMENT_SELECT} WHERE e.user_id = $1 ORDER BY e.created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(enrollments)
}

pub async fn lock_enrollment(conn: &mut PgConnection, id: i64) -> Result<Option<DbEnrollment>> {
    let enrollment = sqlx::query_as::<_, DbEnrollment>(&format!(
        "{ENROLLMENT_SELECT} WHERE e.id = $1 FOR UPDATE OF e"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(enrollment)
}

pub async fn record_lesson_completion(conn: &mut PgConnection, enrollment_id: i64, lesson_id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO lesson_completions (enrollment_id, lesson_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(enrollment_id)
    .bind(lesson_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// (completed lessons, total lessons) for an enrollment.
pub async fn lesson_counts(conn: &mut PgConnection, enrollment_id: i64, course_id: i64) -> Result<(i64, i64)> {
    let counts = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM lesson_completions WHERE enrollment_id = $1),
            (SELECT COUNT(*)
             FROM lessons l
             JOIN course_modules m ON m.id = l.module_id
             WHERE m.course_id = $2)
        "#,
    )
    .bind(enrollment_id)
    .bind(course_id)
    .fetch_one(conn)
    .await?;
    Ok(counts)
}

pub async fn set_progress(conn: &mut PgConnection, id: i64, progress: i32, completed: bool) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE enrollments
        SET progress = $2,
            completed_at = CASE WHEN $3 THEN COALESCE(completed_at, now()) ELSE completed_at END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(progress)
    .bind(completed)
    .execute(conn)
    .await?;
    Ok(())
}
