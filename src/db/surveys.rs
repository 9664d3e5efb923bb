use crate::domain::scoring::QuestionKind;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbSurveyType {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub max_score: i32,
    pub thresholds: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbSurvey {
    pub id: i64,
    pub survey_type_id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbQuestion {
    pub id: i64,
    pub survey_id: i64,
    pub text: String,
    pub kind: QuestionKind,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbOption {
    pub id: i64,
    pub question_id: i64,
    pub label: String,
    pub score: i32,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DbResponse {
    pub id: i64,
    pub survey_id: i64,
    pub user_id: Uuid,
    pub total_score: i32,
    pub risk_level: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAnswer {
    pub id: i64,
    pub response_id: i64,
    pub question_id: i64,
    pub option_id: Option<i64>,
    pub selected_option_ids: Option<String>,
    pub enc_text: Option<String>,
    pub score: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RESPONSE_COLUMNS: &str = "id, survey_id, user_id, total_score, risk_level, created_at, updated_at";
const ANSWER_COLUMNS: &str =
    "id, response_id, question_id, option_id, selected_option_ids, enc_text, score, created_at, updated_at";

// ========== Survey types ==========

pub async fn list_survey_types(pool: &PgPool) -> Result<Vec<DbSurveyType>> {
    let types = sqlx::query_as::<_, DbSurveyType>(
        "SELECT id, name, description, max_score, thresholds FROM survey_types ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(types)
}

pub async fn find_survey_type<'e, E: PgExecutor<'e>>(exec: E, id: i64) -> Result<Option<DbSurveyType>> {
    let survey_type = sqlx::query_as::<_, DbSurveyType>(
        "SELECT id, name, description, max_score, thresholds FROM survey_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(survey_type)
}

pub async fn insert_survey_type(
    pool: &PgPool,
    name: &str,
    description: &str,
    max_score: i32,
    thresholds: &serde_json::Value,
) -> Result<DbSurveyType> {
    let survey_type = sqlx::query_as::<_, DbSurveyType>(
        r#"
        INSERT INTO survey_types (name, description, max_score, thresholds)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, description, max_score, thresholds
        "#,
    )
    .bind(name)
    .bind(description)
    .bind(max_score)
    .bind(thresholds)
    .fetch_one(pool)
    .await?;
    Ok(survey_type)
}

pub async fn update_survey_type(
    pool: &PgPool,
    id: i64,
    description: &str,
    max_score: i32,
    thresholds: &serde_json::Value,
) -> Result<Option<DbSurveyType>> {
    let survey_type = sqlx::query_as::<_, DbSurveyType>(
        r#"
        UPDATE survey_types
        SET description = $2, max_score = $3, thresholds = $4
        WHERE id = $1
        RETURNING id, name, description, max_score, thresholds
        "#,
    )
    .bind(id)
    .bind(description)
    .bind(max_score)
    .bind(thresholds)
    .fetch_optional(pool)
    .await?;
    Ok(survey_type)
}

// ========== Surveys, questions, options ==========

pub async fn list_surveys(pool: &PgPool) -> Result<Vec<DbSurvey>> {
    let surveys = sqlx::query_as::<_, DbSurvey>(
        "SELECT id, survey_type_id, title, description, created_at FROM surveys ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(surveys)
}

pub async fn find_survey<'e, E: PgExecutor<'e>>(exec: E, id: i64) -> Result<Option<DbSurvey>> {
    let survey = sqlx::query_as::<_, DbSurvey>(
        "SELECT id, survey_type_id, title, description, created_at FROM surveys WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(survey)
}

pub async fn insert_survey(pool: &PgPool, survey_type_id: i64, title: &str, description: &str) -> Result<DbSurvey> {
    let survey = sqlx::query_as::<_, DbSurvey>(
        r#"
        INSERT INTO surveys (survey_type_id, title, description)
        VALUES ($1, $2, $3)
        RETURNING id, survey_type_id, title, description, created_at
        "#,
    )
    .bind(survey_type_id)
    .bind(title)
    .bind(description)
    .fetch_one(pool)
    .await?;
    Ok(survey)
}

pub async fn delete_survey(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM surveys WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_questions(pool: &PgPool, survey_id: i64) -> Result<Vec<DbQuestion>> {
    let questions = sqlx::query_as::<_, DbQuestion>(
        "SELECT id, survey_id, text, kind, position FROM survey_questions WHERE survey_id = $1 ORDER BY position, id",
    )
    .bind(survey_id)
    .fetch_all(pool)
    .await?;
    Ok(questions)
}

pub async fn find_question<'e, E: PgExecutor<'e>>(exec: E, id: i64) -> Result<Option<DbQuestion>> {
    let question = sqlx::query_as::<_, DbQuestion>(
        "SELECT id, survey_id, text, kind, position FROM survey_questions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(question)
}

pub async fn insert_question(
    pool: &PgPool,
    survey_id: i64,
    text: &str,
    kind: QuestionKind,
    position: i32,
) -> Result<DbQuestion> {
    let question = sqlx::query_as::<_, DbQuestion>(
        r#"
        INSERT INTO survey_questions (survey_id, text, kind, position)
        VALUES ($1, $2, $3, $4)
        RETURNING id, survey_id, text, kind, position
        "#,
    )
    .bind(survey_id)
    .bind(text)
    .bind(kind)
    .bind(position)
    .fetch_one(pool)
    .await?;
    Ok(question)
}

pub async fn delete_question(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM survey_questions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn question_has_answers(pool: &PgPool, question_id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM survey_answers WHERE question_id = $1)",
    )
    .bind(question_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn list_options<'e, E: PgExecutor<'e>>(exec: E, question_id: i64) -> Result<Vec<DbOption>> {
    let options = sqlx::query_as::<_, DbOption>(
        "SELECT id, question_id, label, score, position FROM survey_options WHERE question_id = $1 ORDER BY position, id",
    )
    .bind(question_id)
    .fetch_all(exec)
    .await?;
    Ok(options)
}

pub async fn list_options_for_survey(pool: &PgPool, survey_id: i64) -> Result<Vec<DbOption>> {
    let options = sqlx::query_as::<_, DbOption>(
        r#"
        SELECT o.id, o.question_id, o.label, o.score, o.position
        FROM survey_options o
        JOIN survey_questions q ON q.id = o.question_id
        WHERE q.survey_id = $1
        ORDER BY o.position, o.id
        "#,
    )
    .bind(survey_id)
    .fetch_all(pool)
    .await?;
    Ok(options)
}

pub async fn find_option(pool: &PgPool, id: i64) -> Result<Option<DbOption>> {
    let option = sqlx::query_as::<_, DbOption>(
        "SELECT id, question_id, label, score, position FROM survey_options WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(option)
}

pub async fn insert_option(pool: &PgPool, question_id: i64, label: &str, score: i32, position: i32) -> Result<DbOption> {
    let option = sqlx::query_as::<_, DbOption>(
        r#"
        INSERT INTO survey_options (question_id, label, score, position)
        VALUES ($1, $2, $3, $4)
        RETURNING id, question_id, label, score, position
        "#,
    )
    .bind(question_id)
    .bind(label)
    .bind(score)
    .bind(position)
    .fetch_one(pool)
    .await?;
    Ok(option)
}

pub async fn delete_option(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM survey_options WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ========== Responses & answers ==========

pub async fn insert_response(pool: &PgPool, survey_id: i64, user_id: Uuid) -> Result<DbResponse> {
    let response = sqlx::query_as::<_, DbResponse>(&format!(
        "INSERT INTO survey_responses (survey_id, user_id) VALUES ($1, $2) RETURNING {RESPONSE_COLUMNS}"
    ))
    .bind(survey_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(response)
}

pub async fn find_response<'e, E: PgExecutor<'e>>(exec: E, id: i64) -> Result<Option<DbResponse>> {
    let response = sqlx::query_as::<_, DbResponse>(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM survey_responses WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(response)
}

/// Row-locks the response for the rest of the transaction, serialising answer edits.
pub async fn lock_response(conn: &mut PgConnection, id: i64) -> Result<Option<DbResponse>> {
    let response = sqlx::query_as::<_, DbResponse>(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM survey_responses WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(response)
}

pub async fn list_responses_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<DbResponse>> {
    let responses = sqlx::query_as::<_, DbResponse>(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM survey_responses WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(responses)
}

pub async fn set_response_total(conn: &mut PgConnection, id: i64, total_score: i32) -> Result<()> {
    sqlx::query("UPDATE survey_responses SET total_score = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(total_score)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_response_risk<'e, E: PgExecutor<'e>>(exec: E, id: i64, risk_level: &str) -> Result<()> {
    sqlx::query("UPDATE survey_responses SET risk_level = $2 WHERE id = $1")
        .bind(id)
        .bind(risk_level)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn list_answers<'e, E: PgExecutor<'e>>(exec: E, response_id: i64) -> Result<Vec<DbAnswer>> {
    let answers = sqlx::query_as::<_, DbAnswer>(&format!(
        r#"
        SELECT {ANSWER_COLUMNS}
        FROM survey_answers
        WHERE response_id = $1
        ORDER BY (SELECT position FROM survey_questions q WHERE q.id = question_id), id
        "#
    ))
    .bind(response_id)
    .fetch_all(exec)
    .await?;
    Ok(answers)
}

pub async fn find_answer<'e, E: PgExecutor<'e>>(exec: E, id: i64) -> Result<Option<DbAnswer>> {
    let answer = sqlx::query_as::<_, DbAnswer>(&format!(
        "SELECT {ANSWER_COLUMNS} FROM survey_answers WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(answer)
}

pub struct AnswerWrite<'a> {
    pub option_id: Option<i64>,
    pub selected_option_ids: Option<&'a str>,
    pub enc_text: Option<&'a str>,
    pub score: i32,
}

pub async fn insert_answer(
    conn: &mut PgConnection,
    response_id: i64,
    question_id: i64,
    write: &AnswerWrite<'_>,
) -> Result<DbAnswer> {
    let answer = sqlx::query_as::<_, DbAnswer>(&format!(
        r#"
        INSERT INTO survey_answers (response_id, question_id, option_id, selected_option_ids, enc_text, score)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {ANSWER_COLUMNS}
        "#
    ))
    .bind(response_id)
    .bind(question_id)
    .bind(write.option_id)
    .bind(write.selected_option_ids)
    .bind(write.enc_text)
    .bind(write.score)
    .fetch_one(conn)
    .await?;
    Ok(answer)
}

pub async fn update_answer(conn: &mut PgConnection, id: i64, write: &AnswerWrite<'_>) -> Result<DbAnswer> {
    let answer = sqlx::query_as::<_, DbAnswer>(&format!(
        r#"
        UPDATE survey_answers
        SET option_id = $2, selected_option_ids = $3, enc_text = $4, score = $5, updated_at = now()
        WHERE id = $1
        RETURNING {ANSWER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(write.option_id)
    .bind(write.selected_option_ids)
    .bind(write.enc_text)
    .bind(write.score)
    .fetch_one(conn)
    .await?;
    Ok(answer)
}

pub async fn set_answer_score(conn: &mut PgConnection, id: i64, score: i32) -> Result<()> {
    sqlx::query("UPDATE survey_answers SET score = $2 WHERE id = $1")
        .bind(id)
        .bind(score)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_answer(conn: &mut PgConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM survey_answers WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}
