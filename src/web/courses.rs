use crate::db::{
    self,
    courses::{DbCourse, DbLesson, DbModule, DbQuiz},
};
use crate::domain::permissions::{Principal, Requirement, COURSE_MANAGE};
use crate::domain::progress::validate_quiz;
use crate::error::{AppError, AppResult};
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CourseRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct PublishRequest {
    #[serde(default = "default_true")]
    pub published: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct ModuleRequest {
    pub title: String,
    #[serde(default)]
    pub position: i32,
}

#[derive(Deserialize)]
pub struct LessonRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub position: i32,
}

#[derive(Deserialize)]
pub struct QuizRequest {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: i32,
}

#[derive(Deserialize)]
pub struct QuizSubmission {
    pub selected_index: i32,
}

#[derive(Debug, Serialize)]
pub struct QuizView {
    pub id: i64,
    pub question: String,
    pub options: Vec<String>,
    /// Only shown to course managers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct LessonView {
    #[serde(flatten)]
    pub lesson: DbLesson,
    pub quizzes: Vec<QuizView>,
}

#[derive(Debug, Serialize)]
pub struct ModuleView {
    #[serde(flatten)]
    pub module: DbModule,
    pub lessons: Vec<LessonView>,
}

#[derive(Debug, Serialize)]
pub struct CourseOutline {
    #[serde(flatten)]
    pub course: DbCourse,
    pub modules: Vec<ModuleView>,
}

#[derive(Serialize)]
pub struct QuizResult {
    pub quiz_id: i64,
    pub correct: bool,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_courses).post(create_course))
        .route("/:id", get(get_course).put(update_course).delete(delete_course))
        .route("/:id/publish", post(publish_course))
        .route("/:id/modules", post(create_module))
        .route("/modules/:id", delete(delete_module))
        .route("/modules/:id/lessons", post(create_lesson))
        .route("/lessons/:id", delete(delete_lesson))
        .route("/lessons/:id/quizzes", post(create_quiz))
        .route("/quizzes/:id", delete(delete_quiz))
        .route("/quizzes/:id/submit", post(submit_quiz))
        .with_state(state)
}

fn manager(principal: &Principal) -> bool {
    principal.can(&Requirement::permission(COURSE_MANAGE))
}

fn required_text(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Nests lessons under modules and quizzes under lessons, keeping the query order.
pub fn build_outline(
    course: DbCourse,
    modules: Vec<DbModule>,
    lessons: Vec<DbLesson>,
    quizzes: Vec<DbQuiz>,
    reveal_answers: bool,
) -> CourseOutline {
    let mut lesson_views: Vec<LessonView> = lessons
        .into_iter()
        .map(|lesson| LessonView { lesson, quizzes: Vec::new() })
        .collect();
    for quiz in quizzes {
        if let Some(view) = lesson_views.iter_mut().find(|l| l.lesson.id == quiz.lesson_id) {
            view.quizzes.push(QuizView {
                id: quiz.id,
                question: quiz.question,
                options: quiz.options.0,
                correct_index: reveal_answers.then_some(quiz.correct_index),
            });
        }
    }

    let mut module_views: Vec<ModuleView> = modules
        .into_iter()
        .map(|module| ModuleView { module, lessons: Vec::new() })
        .collect();
    for lesson in lesson_views {
        if let Some(view) = module_views.iter_mut().find(|m| m.module.id == lesson.lesson.module_id) {
            view.lessons.push(lesson);
        }
    }

    CourseOutline {
        course,
        modules: module_views,
    }
}

async fn list_courses(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<DbCourse>>> {
    Ok(Json(db::courses::list_courses(&state.pool, manager(&principal)).await?))
}

async fn get_course(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<CourseOutline>> {
    let is_manager = manager(&principal);
    let course = db::courses::find_course(&state.pool, id)
        .await?
        .filter(|c| c.published || is_manager)
        .ok_or_else(|| AppError::not_found(format!("course {id}")))?;

    let modules = db::courses::list_modules(&state.pool, id).await?;
    let lessons = db::courses::list_lessons_for_course(&state.pool, id).await?;
    let quizzes = db::courses::list_quizzes_for_course(&state.pool, id).await?;
    Ok(Json(build_outline(course, modules, lessons, quizzes, is_manager)))
}

async fn create_course(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<CourseRequest>,
) -> AppResult<(StatusCode, Json<DbCourse>)> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    let title = required_text(&payload.title, "title")?;
    let course =
        db::courses::insert_course(&state.pool, &title, payload.description.trim(), principal.user_id).await?;
    tracing::info!("Course {} created by {}", course.id, principal.user_id);
    Ok((StatusCode::CREATED, Json(course)))
}

async fn update_course(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<CourseRequest>,
) -> AppResult<Json<DbCourse>> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    let title = required_text(&payload.title, "title")?;
    db::courses::update_course(&state.pool, id, &title, payload.description.trim())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("course {id}")))
}

async fn delete_course(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    if !db::courses::delete_course(&state.pool, id).await? {
        return Err(AppError::not_found(format!("course {id}")));
    }
    tracing::info!("Course {} deleted by {}", id, principal.user_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_course(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    payload: Option<Json<PublishRequest>>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    let published = payload.map(|Json(p)| p.published).unwrap_or(true);
    if !db::courses::set_published(&state.pool, id, published).await? {
        return Err(AppError::not_found(format!("course {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_module(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(course_id): Path<i64>,
    Json(payload): Json<ModuleRequest>,
) -> AppResult<(StatusCode, Json<DbModule>)> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    let title = required_text(&payload.title, "title")?;
    db::courses::find_course(&state.pool, course_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("course {course_id}")))?;
    let module = db::courses::insert_module(&state.pool, course_id, &title, payload.position).await?;
    Ok((StatusCode::CREATED, Json(module)))
}

async fn delete_module(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    if !db::courses::delete_module(&state.pool, id).await? {
        return Err(AppError::not_found(format!("module {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_lesson(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(module_id): Path<i64>,
    Json(payload): Json<LessonRequest>,
) -> AppResult<(StatusCode, Json<DbLesson>)> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    let title = required_text(&payload.title, "title")?;
    if !db::courses::module_exists(&state.pool, module_id).await? {
        return Err(AppError::not_found(format!("module {module_id}")));
    }
    let lesson =
        db::courses::insert_lesson(&state.pool, module_id, &title, &payload.content, payload.position).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

async fn delete_lesson(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    if !db::courses::delete_lesson(&state.pool, id).await? {
        return Err(AppError::not_found(format!("lesson {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_quiz(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(lesson_id): Path<i64>,
    Json(payload): Json<QuizRequest>,
) -> AppResult<(StatusCode, Json<QuizView>)> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    let question = required_text(&payload.question, "question")?;
    let options: Vec<String> = payload.options.iter().map(|o| o.trim().to_string()).collect();
    validate_quiz(&options, payload.correct_index).map_err(AppError::Validation)?;
    if db::courses::lesson_course_id(&state.pool, lesson_id).await?.is_none() {
        return Err(AppError::not_found(format!("lesson {lesson_id}")));
    }

    let quiz = db::courses::insert_quiz(&state.pool, lesson_id, &question, &options, payload.correct_index).await?;
    Ok((
        StatusCode::CREATED,
        Json(QuizView {
            id: quiz.id,
            question: quiz.question,
            options: quiz.options.0,
            correct_index: Some(quiz.correct_index),
        }),
    ))
}

async fn delete_quiz(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&Requirement::permission(COURSE_MANAGE))?;
    if !db::courses::delete_quiz(&state.pool, id).await? {
        return Err(AppError::not_found(format!("quiz {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_quiz(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<QuizSubmission>,
) -> AppResult<Json<QuizResult>> {
    let quiz = db::courses::find_quiz(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("quiz {id}")))?;
    let option_count = quiz.options.0.len();
    if payload.selected_index < 0 || payload.selected_index as usize >= option_count {
        return Err(AppError::validation(format!(
            "selected_index must be between 0 and {}",
            option_count.saturating_sub(1)
        )));
    }

    let correct = payload.selected_index == quiz.correct_index;
    db::courses::insert_quiz_attempt(&state.pool, quiz.id, principal.user_id, payload.selected_index, correct)
        .await?;
    Ok(Json(QuizResult { quiz_id: quiz.id, correct }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json as SqlJson;

    fn course() -> DbCourse {
        DbCourse {
            id: 1,
            title: "Coping skills".to_string(),
            description: String::new(),
            published: true,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn module(id: i64) -> DbModule {
        DbModule { id, course_id: 1, title: format!("Module {id}"), position: id as i32 }
    }

    fn lesson(id: i64, module_id: i64) -> DbLesson {
        DbLesson { id, module_id, title: format!("Lesson {id}"), content: String::new(), position: 0 }
    }

    fn quiz(id: i64, lesson_id: i64) -> DbQuiz {
        DbQuiz {
            id,
            lesson_id,
            question: "Pick one".to_string(),
            options: SqlJson(vec!["a".to_string(), "b".to_string()]),
            correct_index: 1,
        }
    }

    #[test]
    fn outline_nests_content() {
        let outline = build_outline(
            course(),
            vec![module(1), module(2)],
            vec![lesson(10, 1), lesson(11, 2), lesson(12, 2)],
            vec![quiz(100, 11)],
            false,
        );

        assert_eq!(outline.modules.len(), 2);
        assert_eq!(outline.modules[0].lessons.len(), 1);
        assert_eq!(outline.modules[1].lessons.len(), 2);
        let quizzes = &outline.modules[1].lessons[0].quizzes;
        assert_eq!(quizzes.len(), 1);
        assert_eq!(quizzes[0].correct_index, None);
    }

    #[test]
    fn managers_see_answers() {
        let outline = build_outline(course(), vec![module(1)], vec![lesson(10, 1)], vec![quiz(5, 10)], true);
        assert_eq!(outline.modules[0].lessons[0].quizzes[0].correct_index, Some(1));

        let json = serde_json::to_value(&outline).unwrap();
        assert_eq!(json["title"], "Coping skills");
        assert_eq!(json["modules"][0]["lessons"][0]["quizzes"][0]["correct_index"], 1);
    }
}
