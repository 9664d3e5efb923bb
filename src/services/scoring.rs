//! Persistent side of survey scoring.
//!
//! Every answer mutation runs in one transaction holding a row lock on the
//! parent response, so the cached total always equals the sum of the cached
//! answer scores and the cached risk label always matches that total.
use crate::crypto::Crypto;
use crate::db::{self, surveys::AnswerWrite, surveys::DbAnswer, surveys::DbQuestion, surveys::DbResponse};
use crate::domain::scoring::{
    adjust_total, evaluate, score_selection, sum_scores, OptionScore, QuestionKind, RiskLevel,
    RiskThresholds, ScoreResult, ScoringError, Selection,
};
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerInput {
    pub option_id: Option<i64>,
    /// JSON array of option ids, e.g. "[1,3]".
    pub selected_option_ids: Option<String>,
    pub score: Option<i32>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub answer_id: i64,
    pub response_id: i64,
    pub question_id: i64,
    pub score: i32,
    pub delta: i32,
    pub total_score: i32,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecomputeReport {
    pub response_id: i64,
    pub previous_total: i32,
    pub total_score: i32,
    pub risk_level: RiskLevel,
    pub answers_rescored: usize,
}

struct ComputedAnswer {
    selection: Selection,
    score: i32,
    enc_text: Option<String>,
}

fn ensure_owner(response: &DbResponse, user_id: Uuid) -> AppResult<()> {
    if response.user_id != user_id {
        return Err(AppError::Forbidden(
            "only the respondent may change answers".to_string(),
        ));
    }
    Ok(())
}

async fn option_scores(conn: &mut PgConnection, question: &DbQuestion) -> AppResult<Vec<OptionScore>> {
    if !question.kind.has_options() {
        return Ok(Vec::new());
    }
    let options = db::surveys::list_options(conn, question.id).await?;
    Ok(options
        .into_iter()
        .map(|o| OptionScore { id: o.id, score: o.score })
        .collect())
}

async fn compute_answer(
    conn: &mut PgConnection,
    crypto: &Crypto,
    question: &DbQuestion,
    input: &AnswerInput,
) -> AppResult<ComputedAnswer> {
    let selection = Selection::from_input(
        question.kind,
        input.option_id,
        input.selected_option_ids.as_deref(),
        input.score,
    )?;
    let options = option_scores(conn, question).await?;
    let score = score_selection(question.kind, &selection, &options)?;

    let enc_text = if question.kind == QuestionKind::Text {
        crypto
            .seal_opt(input.text.as_deref())
            .map_err(|e| AppError::Internal(e.into()))?
    } else {
        None
    };

    Ok(ComputedAnswer {
        selection,
        score,
        enc_text,
    })
}

async fn load_question(conn: &mut PgConnection, question_id: i64, survey_id: i64) -> AppResult<DbQuestion> {
    let question = db::surveys::find_question(conn, question_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("question {question_id}")))?;
    if question.survey_id != survey_id {
        return Err(AppError::validation(format!(
            "question {question_id} does not belong to survey {survey_id}"
        )));
    }
    Ok(question)
}

/// Adds an answer to a response and folds its score into the response total.
pub async fn record_answer(
    pool: &PgPool,
    crypto: &Crypto,
    user_id: Uuid,
    response_id: i64,
    question_id: i64,
    input: &AnswerInput,
) -> AppResult<AnswerOutcome> {
    let mut tx = pool.begin().await?;

    let response = db::surveys::lock_response(&mut tx, response_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("response {response_id}")))?;
    ensure_owner(&response, user_id)?;

    let question = load_question(&mut tx, question_id, response.survey_id).await?;
    let computed = compute_answer(&mut tx, crypto, &question, input).await?;
    let encoded_ids = computed.selection.encoded_ids();

    let answer = db::surveys::insert_answer(
        &mut tx,
        response.id,
        question.id,
        &AnswerWrite {
            option_id: computed.selection.option_id(),
            selected_option_ids: encoded_ids.as_deref(),
            enc_text: computed.enc_text.as_deref(),
            score: computed.score,
        },
    )
    .await?;

    let total = adjust_total(response.total_score, 0, computed.score)?;
    db::surveys::set_response_total(&mut tx, response.id, total).await?;
    let result = refresh_risk(&mut tx, &response, total).await?;
    tx.commit().await?;

    tracing::debug!(
        "Recorded answer {} on response {} (score {}, total {}, {})",
        answer.id,
        response.id,
        computed.score,
        total,
        result.risk_level.label()
    );

    Ok(AnswerOutcome {
        answer_id: answer.id,
        response_id: response.id,
        question_id: question.id,
        score: computed.score,
        delta: computed.score,
        total_score: total,
        risk_level: result.risk_level,
    })
}

/// Replaces an answer's selection: the old contribution is subtracted and the new one added.
pub async fn update_answer(
    pool: &PgPool,
    crypto: &Crypto,
    user_id: Uuid,
    answer_id: i64,
    input: &AnswerInput,
) -> AppResult<AnswerOutcome> {
    let mut tx = pool.begin().await?;

    let (response, previous) = lock_answer(&mut tx, answer_id).await?;
    ensure_owner(&response, user_id)?;

    let question = load_question(&mut tx, previous.question_id, response.survey_id).await?;
    let computed = compute_answer(&mut tx, crypto, &question, input).await?;
    let encoded_ids = computed.selection.encoded_ids();

    db::surveys::update_answer(
        &mut tx,
        previous.id,
        &AnswerWrite {
            option_id: computed.selection.option_id(),
            selected_option_ids: encoded_ids.as_deref(),
            enc_text: computed.enc_text.as_deref(),
            score: computed.score,
        },
    )
    .await?;

    let total = adjust_total(response.total_score, previous.score, computed.score)?;
    db::surveys::set_response_total(&mut tx, response.id, total).await?;
    let result = refresh_risk(&mut tx, &response, total).await?;
    tx.commit().await?;

    Ok(AnswerOutcome {
        answer_id: previous.id,
        response_id: response.id,
        question_id: question.id,
        score: computed.score,
        delta: computed.score - previous.score,
        total_score: total,
        risk_level: result.risk_level,
    })
}

pub async fn delete_answer(pool: &PgPool, user_id: Uuid, answer_id: i64) -> AppResult<AnswerOutcome> {
    let mut tx = pool.begin().await?;

    let (response, answer) = lock_answer(&mut tx, answer_id).await?;
    ensure_owner(&response, user_id)?;

    db::surveys::delete_answer(&mut tx, answer.id).await?;
    let total = adjust_total(response.total_score, answer.score, 0)?;
    db::surveys::set_response_total(&mut tx, response.id, total).await?;
    let result = refresh_risk(&mut tx, &response, total).await?;
    tx.commit().await?;

    Ok(AnswerOutcome {
        answer_id: answer.id,
        response_id: response.id,
        question_id: answer.question_id,
        score: 0,
        delta: -answer.score,
        total_score: total,
        risk_level: result.risk_level,
    })
}

/// Locks the answer's response, then re-reads the answer under that lock so its
/// cached score cannot be stale.
async fn lock_answer(conn: &mut PgConnection, answer_id: i64) -> AppResult<(DbResponse, DbAnswer)> {
    let not_found = || AppError::not_found(format!("answer {answer_id}"));

    let unlocked = db::surveys::find_answer(&mut *conn, answer_id)
        .await?
        .ok_or_else(not_found)?;
    let response = db::surveys::lock_response(&mut *conn, unlocked.response_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("response {}", unlocked.response_id)))?;
    let answer = db::surveys::find_answer(&mut *conn, answer_id)
        .await?
        .ok_or_else(not_found)?;
    Ok((response, answer))
}

/// What a freshly computed tier means for the cached label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RiskChange {
    store: bool,
    notify: bool,
}

fn risk_change(cached: Option<&str>, level: RiskLevel) -> RiskChange {
    let store = cached != Some(level.label());
    RiskChange {
        store,
        notify: store && level == RiskLevel::High,
    }
}

/// Classifies `total` against the survey type's thresholds and writes the label
/// when it changed. Entering high risk notifies the respondent. The caller must
/// hold the response row lock.
async fn refresh_risk(conn: &mut PgConnection, response: &DbResponse, total: i32) -> AppResult<ScoreResult> {
    let survey = db::surveys::find_survey(&mut *conn, response.survey_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey {}", response.survey_id)))?;
    let survey_type = db::surveys::find_survey_type(&mut *conn, survey.survey_type_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("survey type {}", survey.survey_type_id)))?;

    let thresholds = RiskThresholds::from_json(&survey_type.thresholds).map_err(|e| {
        tracing::error!(
            "Survey type {} has a malformed threshold table: {}",
            survey_type.id,
            e
        );
        e
    })?;
    let result = evaluate(total, survey_type.max_score, &thresholds);
    let label = result.risk_level.label();
    let change = risk_change(response.risk_level.as_deref(), result.risk_level);

    if change.store {
        db::surveys::set_response_risk(&mut *conn, response.id, label).await?;
    }
    if change.notify {
        db::notifications::insert_notification(
            &mut *conn,
            response.user_id,
            "Your survey result needs attention",
            &format!(
                "Your result for \"{}\" was classified as {}. Consider booking a session with a consultant.",
                survey.title, label
            ),
        )
        .await?;
    }

    Ok(result)
}

/// Classifies the response's current total, under the response lock so the
/// label and any notification follow the latest committed answers.
pub async fn score_response(pool: &PgPool, response_id: i64) -> AppResult<ScoreResult> {
    let mut tx = pool.begin().await?;

    let response = db::surveys::lock_response(&mut tx, response_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("response {response_id}")))?;
    let result = refresh_risk(&mut tx, &response, response.total_score).await?;
    tx.commit().await?;

    Ok(result)
}

/// Rebuilds the scoring selection from a stored answer row.
fn stored_selection(kind: QuestionKind, answer: &DbAnswer) -> Result<Selection, ScoringError> {
    match kind {
        QuestionKind::SingleChoice => answer.option_id.map(Selection::Single).ok_or_else(|| {
            ScoringError::Data(format!("answer {} has no selected option", answer.id))
        }),
        QuestionKind::CheckboxMultiple => {
            crate::domain::scoring::decode_option_ids(answer.selected_option_ids.as_deref())
                .map(Selection::Multiple)
                .map_err(|e| ScoringError::Data(format!("answer {}: {e}", answer.id)))
        }
        QuestionKind::Text => Ok(Selection::Direct(answer.score)),
    }
}

/// Repair pass: rescores every answer from current option scores and rewrites the total.
pub async fn recompute_response(pool: &PgPool, response_id: i64) -> AppResult<RecomputeReport> {
    let mut tx = pool.begin().await?;

    let response = db::surveys::lock_response(&mut tx, response_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("response {response_id}")))?;
    let answers = db::surveys::list_answers(&mut *tx, response.id).await?;

    let mut scores = Vec::with_capacity(answers.len());
    let mut rescored = 0;
    for answer in &answers {
        let question = load_question(&mut tx, answer.question_id, response.survey_id).await?;
        let selection = stored_selection(question.kind, answer)?;
        let options = option_scores(&mut tx, &question).await?;
        let score = score_selection(question.kind, &selection, &options)?;
        if score != answer.score {
            db::surveys::set_answer_score(&mut tx, answer.id, score).await?;
            rescored += 1;
        }
        scores.push(score);
    }

    let total = sum_scores(scores)?;
    if total != response.total_score {
        tracing::warn!(
            "Response {} total drifted: cached {}, recomputed {}",
            response.id,
            response.total_score,
            total
        );
    }
    db::surveys::set_response_total(&mut tx, response.id, total).await?;
    let result = refresh_risk(&mut tx, &response, total).await?;
    tx.commit().await?;

    Ok(RecomputeReport {
        response_id: response.id,
        previous_total: response.total_score,
        total_score: total,
        risk_level: result.risk_level,
        answers_rescored: rescored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn answer(option_id: Option<i64>, ids: Option<&str>, score: i32) -> DbAnswer {
        DbAnswer {
            id: 11,
            response_id: 3,
            question_id: 5,
            option_id,
            selected_option_ids: ids.map(str::to_string),
            enc_text: None,
            score,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn response(user_id: Uuid) -> DbResponse {
        DbResponse {
            id: 3,
            survey_id: 1,
            user_id,
            total_score: 0,
            risk_level: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn stored_answers_rebuild_their_selection() {
        assert_eq!(
            stored_selection(QuestionKind::SingleChoice, &answer(Some(4), None, 2)).unwrap(),
            Selection::Single(4)
        );
        assert_eq!(
            stored_selection(QuestionKind::CheckboxMultiple, &answer(None, Some("[3,1]"), 7)).unwrap(),
            Selection::Multiple(vec![1, 3])
        );
        assert_eq!(
            stored_selection(QuestionKind::Text, &answer(None, None, 5)).unwrap(),
            Selection::Direct(5)
        );
    }

    #[test]
    fn corrupt_stored_answers_are_data_errors() {
        assert!(matches!(
            stored_selection(QuestionKind::SingleChoice, &answer(None, None, 2)),
            Err(ScoringError::Data(_))
        ));
        assert!(matches!(
            stored_selection(QuestionKind::CheckboxMultiple, &answer(None, Some("1,3"), 2)),
            Err(ScoringError::Data(_))
        ));
    }

    #[test]
    fn only_respondent_may_edit() {
        let owner = Uuid::new_v4();
        assert!(ensure_owner(&response(owner), owner).is_ok());
        assert!(matches!(
            ensure_owner(&response(owner), Uuid::new_v4()),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn label_is_stored_only_when_the_tier_moves() {
        assert_eq!(
            risk_change(None, RiskLevel::Low),
            RiskChange { store: true, notify: false }
        );
        assert_eq!(
            risk_change(Some("Low Risk"), RiskLevel::Low),
            RiskChange { store: false, notify: false }
        );
        assert_eq!(
            risk_change(Some("Moderate Risk"), RiskLevel::High),
            RiskChange { store: true, notify: true }
        );
        assert_eq!(
            risk_change(Some("High Risk"), RiskLevel::High),
            RiskChange { store: false, notify: false }
        );
        assert_eq!(
            risk_change(Some("High Risk"), RiskLevel::Low),
            RiskChange { store: true, notify: false }
        );
    }

    mod persisted {
        use super::*;
        use serde_json::json;
        use sqlx::postgres::PgPoolOptions;

        /// Runs against `DATABASE_URL` when it is set; skipped otherwise.
        async fn test_pool() -> Option<PgPool> {
            let Ok(url) = std::env::var("DATABASE_URL") else {
                eprintln!("DATABASE_URL not set, skipping");
                return None;
            };
            let pool = PgPoolOptions::new()
                .max_connections(4)
                .connect(&url)
                .await
                .expect("connect to test database");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("run migrations");
            Some(pool)
        }

        struct Fixture {
            user_id: Uuid,
            response_id: i64,
            /// (question id, option id) per option score requested.
            choices: Vec<(i64, i64)>,
        }

        /// One single-choice question per entry in `scores`, each with a single
        /// option worth that score. Thresholds: low <= 10, moderate <= 20.
        async fn fixture(pool: &PgPool, scores: &[i32]) -> Fixture {
            let tag = Uuid::new_v4();
            let user_id = db::insert_user(pool, &format!("{tag}@example.test"), "x", "Respondent", None)
                .await
                .unwrap();
            let survey_type = db::surveys::insert_survey_type(
                pool,
                &format!("screening-{tag}"),
                "",
                50,
                &json!({ "low": { "max": 10 }, "moderate": { "max": 20 } }),
            )
            .await
            .unwrap();
            let survey = db::surveys::insert_survey(pool, survey_type.id, "Wellbeing check", "")
                .await
                .unwrap();

            let mut choices = Vec::new();
            for (position, score) in scores.iter().enumerate() {
                let question = db::surveys::insert_question(
                    pool,
                    survey.id,
                    &format!("Question {position}"),
                    QuestionKind::SingleChoice,
                    position as i32,
                )
                .await
                .unwrap();
                let option = db::surveys::insert_option(pool, question.id, "Often", *score, 0)
                    .await
                    .unwrap();
                choices.push((question.id, option.id));
            }

            let response = db::surveys::insert_response(pool, survey.id, user_id).await.unwrap();
            Fixture {
                user_id,
                response_id: response.id,
                choices,
            }
        }

        fn pick(option_id: i64) -> AnswerInput {
            AnswerInput {
                option_id: Some(option_id),
                selected_option_ids: None,
                score: None,
                text: None,
            }
        }

        fn crypto() -> Crypto {
            Crypto::new(&[7u8; 32]).unwrap()
        }

        async fn stored(pool: &PgPool, response_id: i64) -> (i32, Option<String>) {
            let row = db::surveys::find_response(pool, response_id).await.unwrap().unwrap();
            (row.total_score, row.risk_level)
        }

        async fn attention_notices(pool: &PgPool, user_id: Uuid) -> usize {
            db::notifications::list_notifications(pool, user_id, false, 50)
                .await
                .unwrap()
                .iter()
                .filter(|n| n.title == "Your survey result needs attention")
                .count()
        }

        #[tokio::test]
        async fn deleting_an_answer_subtracts_its_score() {
            let Some(pool) = test_pool().await else { return };
            let fx = fixture(&pool, &[5, 7, 3]).await;
            let crypto = crypto();

            let mut seven = None;
            for (question_id, option_id) in &fx.choices {
                let outcome = record_answer(&pool, &crypto, fx.user_id, fx.response_id, *question_id, &pick(*option_id))
                    .await
                    .unwrap();
                if outcome.score == 7 {
                    seven = Some(outcome.answer_id);
                }
            }
            assert_eq!(stored(&pool, fx.response_id).await, (15, Some("Moderate Risk".to_string())));

            let outcome = delete_answer(&pool, fx.user_id, seven.unwrap()).await.unwrap();
            assert_eq!(outcome.delta, -7);
            assert_eq!(outcome.total_score, 8);
            assert_eq!(outcome.risk_level, RiskLevel::Low);
            assert_eq!(stored(&pool, fx.response_id).await, (8, Some("Low Risk".to_string())));
        }

        #[tokio::test]
        async fn every_mutation_keeps_total_and_label_in_step() {
            let Some(pool) = test_pool().await else { return };
            let fx = fixture(&pool, &[25]).await;
            let crypto = crypto();
            let (question_id, high_option) = fx.choices[0];
            let low_option = db::surveys::insert_option(&pool, question_id, "Rarely", 4, 1)
                .await
                .unwrap()
                .id;

            let added = record_answer(&pool, &crypto, fx.user_id, fx.response_id, question_id, &pick(high_option))
                .await
                .unwrap();
            assert_eq!(stored(&pool, fx.response_id).await, (25, Some("High Risk".to_string())));
            assert_eq!(attention_notices(&pool, fx.user_id).await, 1);

            update_answer(&pool, &crypto, fx.user_id, added.answer_id, &pick(low_option))
                .await
                .unwrap();
            assert_eq!(stored(&pool, fx.response_id).await, (4, Some("Low Risk".to_string())));

            delete_answer(&pool, fx.user_id, added.answer_id).await.unwrap();
            assert_eq!(stored(&pool, fx.response_id).await, (0, Some("Low Risk".to_string())));

            let answers = db::surveys::list_answers(&pool, fx.response_id).await.unwrap();
            let sum: i32 = answers.iter().map(|a| a.score).sum();
            assert_eq!(sum, 0);
        }

        #[tokio::test]
        async fn concurrent_scoring_notifies_once_per_tier_change() {
            let Some(pool) = test_pool().await else { return };
            let fx = fixture(&pool, &[30]).await;
            let crypto = crypto();
            let (question_id, option_id) = fx.choices[0];

            record_answer(&pool, &crypto, fx.user_id, fx.response_id, question_id, &pick(option_id))
                .await
                .unwrap();
            assert_eq!(attention_notices(&pool, fx.user_id).await, 1);

            // A row written before labels were cached.
            sqlx::query("UPDATE survey_responses SET risk_level = NULL WHERE id = $1")
                .bind(fx.response_id)
                .execute(&pool)
                .await
                .unwrap();
            let (first, second) = tokio::join!(
                score_response(&pool, fx.response_id),
                score_response(&pool, fx.response_id)
            );
            assert_eq!(first.unwrap().risk_level, RiskLevel::High);
            assert_eq!(second.unwrap().risk_level, RiskLevel::High);
            assert_eq!(attention_notices(&pool, fx.user_id).await, 2);
            assert_eq!(stored(&pool, fx.response_id).await, (30, Some("High Risk".to_string())));
        }

        #[tokio::test]
        async fn malformed_thresholds_abort_the_mutation() {
            let Some(pool) = test_pool().await else { return };
            let fx = fixture(&pool, &[5]).await;
            let (question_id, option_id) = fx.choices[0];
            let survey_id = db::surveys::find_response(&pool, fx.response_id)
                .await
                .unwrap()
                .unwrap()
                .survey_id;
            sqlx::query(
                "UPDATE survey_types SET thresholds = '{\"low\": {}}' \
                 WHERE id = (SELECT survey_type_id FROM surveys WHERE id = $1)",
            )
            .bind(survey_id)
            .execute(&pool)
            .await
            .unwrap();

            let err = record_answer(&pool, &crypto(), fx.user_id, fx.response_id, question_id, &pick(option_id))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Data(_)));
            assert_eq!(stored(&pool, fx.response_id).await, (0, None));
            assert!(db::surveys::list_answers(&pool, fx.response_id).await.unwrap().is_empty());
        }
    }
}
