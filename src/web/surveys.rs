use crate::db::{
    self,
    surveys::{DbAnswer, DbOption, DbQuestion, DbResponse, DbSurvey, DbSurveyType},
};
use crate::domain::permissions::{Principal, Requirement, SURVEY_MANAGE, SURVEY_READ_ALL};
use crate::domain::scoring::{decode_option_ids, QuestionKind, RiskThresholds, ScoreResult};
use crate::error::{AppError, AppResult};
use crate::services::scoring::{self, AnswerInput, AnswerOutcome, RecomputeReport};
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize)]
pub struct SurveyTypeRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_score: i32,
    pub thresholds: serde_json::Value,
}

#[derive(Deserialize)]
pub struct SurveyTypeUpdate {
    pub description: Option<String>,
    pub max_score: Option<i32>,
    pub thresholds: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct SurveyRequest {
    pub survey_type_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct QuestionRequest {
    pub text: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub position: i32,
}

#[derive(Deserialize)]
pub struct OptionRequest {
    pub label: String,
    pub score: i32,
    #[serde(default)]
    pub position: i32,
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub question_id: i64,
    #[serde(flatten)]
    pub input: AnswerInput,
}

#[derive(Serialize)]
pub struct QuestionView {
    #[serde(flatten)]
    pub question: DbQuestion,
    pub options: Vec<DbOption>,
}

#[derive(Serialize)]
pub struct SurveyDetail {
    #[serde(flatten)]
    pub survey: DbSurvey,
    pub survey_type: DbSurveyType,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Serialize)]
pub struct AnswerView {
    pub id: i64,
    pub question_id: i64,
    pub option_id: Option<i64>,
    pub selected_option_ids: Vec<i64>,
    pub text: Option<String>,
    pub score: i32,
}

#[derive(Serialize)]
pub struct ResponseDetail {
    #[serde(flatten)]
    pub response: DbResponse,
    pub answers: Vec<AnswerView>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/types", get(list_types).post(create_type))
        .route("/types/:id", put(update_type))
        .route("/", get(list_surveys).post(create_survey))
        .route("/:id", get(get_survey).delete(delete_survey))
        .route("/:id/questions", post(create_question))
        .route("/questions/:id", delete(delete_question))
        .route("/questions/:id/options", post(create_option))
        .route("/options/:id", delete(delete_option))
        .route("/:id/responses", post(start_response))
        .route("/responses/mine", get(my_responses))
        .route("/responses/:id", get(get_response))
        .route("/responses/:id/answers", post(add_answer))
        .route("/responses/:id/result", get(response_result))
        .route("/responses/:id/recompute", post(recompute))
        .route("/answers/:id", put(change_answer).delete(remove_answer))
        .with_state(state)
}

fn manage() -> Requirement {
    Requirement::permission(SURVEY_MANAGE)
}

fn required_text(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Rejects malformed tables before they reach storage; returns the canonical form.
fn validated_thresholds(raw: &serde_json::Value, max_score: i32) -> AppResult<serde_json::Value> {
    if max_score <= 0 {
        return Err(AppError::Data("max_score must be positive".to_string()));
    }
    Ok(RiskThresholds::from_json(raw)?.to_json())
}

fn answer_view(answer: DbAnswer, crypto: &crate::crypto::Crypto) -> AppResult<AnswerView> {
    let selected_option_ids = decode_option_ids(answer.selected_option_ids.as_deref()).map_err(|e| {
        tracing::error!("Answer {} has an unreadable option list: {}", answer.id, e);
        AppError::Data(format!("answer {}: {e}", answer.id))
    })?;
    Ok(AnswerView {
        text: crypto.open_lossy(answer.enc_text.as_deref()),
        id: answer.id,
        question_id: answer.question_id,
        option_id: answer.option_id,
        selected_option_ids,
        score: answer.score,
    })
}

/// The respondent, or anyone allowed to read every response.
async fn readable_response(state: &SharedState, principal: &Principal, id: i64) -> AppResult<DbResponse> {
    let response = db::surveys::find_response(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("response {id}")))?;
    if response.user_id != principal.user_id {
        principal.authorize(&Requirement::permission(SURVEY_READ_ALL))?;
    }
    Ok(response)
}

// ========== Survey types ==========

async fn list_types(
    UserSession(_principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<DbSurveyType>>> {
    Ok(Json(db::surveys::list_survey_types(&state.pool).await?))
}

async fn create_type(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<SurveyTypeRequest>,
) -> AppResult<(StatusCode, Json<DbSurveyType>)> {
    principal.authorize(&manage())?;
    let name = required_text(&payload.name, "name")?;
    let thresholds = validated_thresholds(&payload.thresholds, payload.max_score)?;

    let survey_type = db::surveys::insert_survey_type(
        &state.pool,
        &name,
        payload.description.trim(),
        payload.max_score,
        &thresholds,
    )
    .await?;
    tracing::info!("Survey type {} created by {}", survey_type.id, principal.user_id);
    Ok((StatusCode::CREATED, Json(survey_type)))
}

async fn update_type(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<SurveyTypeUpdate>,
) -> AppResult<Json<DbSurveyType>> {
    principal.authorize(&manage())?;
    let current = db::surveys::find_survey_type(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey type {id}")))?;

    let max_score = payload.max_score.unwrap_or(current.max_score);
    let thresholds = validated_thresholds(payload.thresholds.as_ref().unwrap_or(&current.thresholds), max_score)?;
    let description = payload.description.as_deref().map(str::trim).unwrap_or(&current.description);

    db::surveys::update_survey_type(&state.pool, id, description, max_score, &thresholds)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("survey type {id}")))
}

// ========== Surveys, questions, options ==========

async fn list_surveys(
    UserSession(_principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<DbSurvey>>> {
    Ok(Json(db::surveys::list_surveys(&state.pool).await?))
}

async fn get_survey(
    UserSession(_principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<SurveyDetail>> {
    let survey = db::surveys::find_survey(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey {id}")))?;
    let survey_type = db::surveys::find_survey_type(&state.pool, survey.survey_type_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey type {}", survey.survey_type_id)))?;
    let questions = db::surveys::list_questions(&state.pool, id).await?;
    let mut by_question: HashMap<i64, Vec<DbOption>> = HashMap::new();
    for option in db::surveys::list_options_for_survey(&state.pool, id).await? {
        by_question.entry(option.question_id).or_default().push(option);
    }

    let questions = questions
        .into_iter()
        .map(|question| {
            let options = by_question.remove(&question.id).unwrap_or_default();
            QuestionView { question, options }
        })
        .collect();

    Ok(Json(SurveyDetail {
        survey,
        survey_type,
        questions,
    }))
}

async fn create_survey(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<SurveyRequest>,
) -> AppResult<(StatusCode, Json<DbSurvey>)> {
    principal.authorize(&manage())?;
    let title = required_text(&payload.title, "title")?;
    db::surveys::find_survey_type(&state.pool, payload.survey_type_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey type {}", payload.survey_type_id)))?;

    let survey =
        db::surveys::insert_survey(&state.pool, payload.survey_type_id, &title, payload.description.trim()).await?;
    Ok((StatusCode::CREATED, Json(survey)))
}

async fn delete_survey(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&manage())?;
    if !db::surveys::delete_survey(&state.pool, id).await? {
        return Err(AppError::not_found(format!("survey {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_question(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<i64>,
    Json(payload): Json<QuestionRequest>,
) -> AppResult<(StatusCode, Json<DbQuestion>)> {
    principal.authorize(&manage())?;
    let text = required_text(&payload.text, "text")?;
    db::surveys::find_survey(&state.pool, survey_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey {survey_id}")))?;

    let question =
        db::surveys::insert_question(&state.pool, survey_id, &text, payload.kind, payload.position).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

async fn delete_question(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&manage())?;
    if db::surveys::question_has_answers(&state.pool, id).await? {
        return Err(AppError::Conflict(format!("question {id} already has answers")));
    }
    if !db::surveys::delete_question(&state.pool, id).await? {
        return Err(AppError::not_found(format!("question {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_option(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(question_id): Path<i64>,
    Json(payload): Json<OptionRequest>,
) -> AppResult<(StatusCode, Json<DbOption>)> {
    principal.authorize(&manage())?;
    let label = required_text(&payload.label, "label")?;
    let question = db::surveys::find_question(&state.pool, question_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("question {question_id}")))?;
    if !question.kind.has_options() {
        return Err(AppError::validation("text questions do not take options"));
    }

    let option =
        db::surveys::insert_option(&state.pool, question.id, &label, payload.score, payload.position).await?;
    Ok((StatusCode::CREATED, Json(option)))
}

async fn delete_option(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    principal.authorize(&manage())?;
    let option = db::surveys::find_option(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("option {id}")))?;
    // Multi-select answers reference options by id inside a text column, so
    // the foreign key alone cannot protect them.
    if db::surveys::question_has_answers(&state.pool, option.question_id).await? {
        return Err(AppError::Conflict(format!(
            "question {} already has answers",
            option.question_id
        )));
    }
    db::surveys::delete_option(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ========== Responses & answers ==========

async fn start_response(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<i64>,
) -> AppResult<(StatusCode, Json<DbResponse>)> {
    db::surveys::find_survey(&state.pool, survey_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey {survey_id}")))?;
    let response = db::surveys::insert_response(&state.pool, survey_id, principal.user_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn my_responses(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
) -> AppResult<Json<Vec<DbResponse>>> {
    Ok(Json(
        db::surveys::list_responses_for_user(&state.pool, principal.user_id).await?,
    ))
}

async fn get_response(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ResponseDetail>> {
    let response = readable_response(&state, &principal, id).await?;
    let answers = db::surveys::list_answers(&state.pool, response.id)
        .await?
        .into_iter()
        .map(|a| answer_view(a, &state.crypto))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(ResponseDetail { response, answers }))
}

async fn response_result(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ScoreResult>> {
    let response = readable_response(&state, &principal, id).await?;
    Ok(Json(scoring::score_response(&state.pool, response.id).await?))
}

async fn add_answer(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(response_id): Path<i64>,
    Json(payload): Json<AnswerRequest>,
) -> AppResult<(StatusCode, Json<AnswerOutcome>)> {
    let outcome = scoring::record_answer(
        &state.pool,
        &state.crypto,
        principal.user_id,
        response_id,
        payload.question_id,
        &payload.input,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn change_answer(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(answer_id): Path<i64>,
    Json(payload): Json<AnswerInput>,
) -> AppResult<Json<AnswerOutcome>> {
    let outcome =
        scoring::update_answer(&state.pool, &state.crypto, principal.user_id, answer_id, &payload).await?;
    Ok(Json(outcome))
}

async fn remove_answer(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(answer_id): Path<i64>,
) -> AppResult<Json<AnswerOutcome>> {
    Ok(Json(
        scoring::delete_answer(&state.pool, principal.user_id, answer_id).await?,
    ))
}

async fn recompute(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(response_id): Path<i64>,
) -> AppResult<Json<RecomputeReport>> {
    principal.authorize(&manage())?;
    let report = scoring::recompute_response(&state.pool, response_id).await?;
    tracing::info!(
        "Response {} recomputed by {}: {} -> {}",
        response_id,
        principal.user_id,
        report.previous_total,
        report.total_score
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn threshold_tables_are_validated_and_canonicalised() {
        let table = validated_thresholds(&json!({"low": {"max": 4}, "moderate": {"max": 9}}), 27).unwrap();
        assert_eq!(table, json!({"low": {"max": 4}, "moderate": {"max": 9}}));

        let err = validated_thresholds(&json!({"low": {"max": 4}}), 27).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let err = validated_thresholds(&json!({"low": {"max": 4}, "moderate": {"max": 9}}), 0).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn answer_payload_flattens_input() {
        let request: AnswerRequest = serde_json::from_value(json!({
            "question_id": 3,
            "selected_option_ids": "[2,1]"
        }))
        .unwrap();
        assert_eq!(request.question_id, 3);
        assert_eq!(request.input.selected_option_ids.as_deref(), Some("[2,1]"));
        assert_eq!(request.input.option_id, None);
    }

    #[test]
    fn answer_view_decodes_ids_and_text() {
        let crypto = crate::crypto::Crypto::new(&[3u8; 32]).unwrap();
        let now = chrono::Utc::now();
        let view = answer_view(
            DbAnswer {
                id: 1,
                response_id: 1,
                question_id: 2,
                option_id: None,
                selected_option_ids: Some("[3,1]".to_string()),
                enc_text: Some(crypto.seal("felt tired").unwrap()),
                score: 7,
                created_at: now,
                updated_at: now,
            },
            &crypto,
        )
        .unwrap();
        assert_eq!(view.selected_option_ids, vec![1, 3]);
        assert_eq!(view.text.as_deref(), Some("felt tired"));
    }

    #[test]
    fn unreadable_option_list_is_a_data_error() {
        let crypto = crate::crypto::Crypto::new(&[3u8; 32]).unwrap();
        let now = chrono::Utc::now();
        let result = answer_view(
            DbAnswer {
                id: 4,
                response_id: 1,
                question_id: 2,
                option_id: None,
                selected_option_ids: Some("1;3".to_string()),
                enc_text: None,
                score: 2,
                created_at: now,
                updated_at: now,
            },
            &crypto,
        );
        assert!(matches!(result, Err(AppError::Data(_))));
    }
}
