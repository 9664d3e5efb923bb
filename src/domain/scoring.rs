//! Survey scoring and risk classification.
//!
//! Everything here is pure: callers load the question, its options and the
//! survey type's threshold table, then ask this module for an answer score,
//! a new response total, or a risk tier. Persistence lives in
//! `services::scoring`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "question_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    CheckboxMultiple,
    Text,
}

impl QuestionKind {
    pub fn has_options(&self) -> bool {
        !matches!(self, QuestionKind::Text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Moderate Risk")]
    Moderate,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Moderate => "Moderate Risk",
            RiskLevel::High => "High Risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid selection: {0}")]
    Validation(String),
    #[error("malformed survey configuration: {0}")]
    Data(String),
}

const TIERS: [&str; 3] = ["low", "moderate", "high"];

/// Per-survey-type threshold table. Each tier's `max` is inclusive.
/// The `high` tier is optional and informational: anything above
/// `moderate_max` is high risk regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskThresholds {
    pub low_max: i32,
    pub moderate_max: i32,
    pub high_max: Option<i32>,
}

impl RiskThresholds {
    pub fn new(low_max: i32, moderate_max: i32, high_max: Option<i32>) -> Result<Self, ScoringError> {
        if moderate_max < low_max {
            return Err(ScoringError::Data(format!(
                "moderate max {moderate_max} is below low max {low_max}"
            )));
        }
        if let Some(high) = high_max {
            if high < moderate_max {
                return Err(ScoringError::Data(format!(
                    "high max {high} is below moderate max {moderate_max}"
                )));
            }
        }
        Ok(Self {
            low_max,
            moderate_max,
            high_max,
        })
    }

    /// Parses `{"low": {"max": 10}, "moderate": {"max": 20}}`.
    pub fn from_json(value: &Value) -> Result<Self, ScoringError> {
        let table = value
            .as_object()
            .ok_or_else(|| ScoringError::Data("threshold table must be an object".to_string()))?;

        if let Some(unknown) = table.keys().find(|k| !TIERS.contains(&k.as_str())) {
            return Err(ScoringError::Data(format!("unknown risk tier '{unknown}'")));
        }

        let low = tier_max(table, "low")?
            .ok_or_else(|| ScoringError::Data("missing 'low' tier".to_string()))?;
        let moderate = tier_max(table, "moderate")?
            .ok_or_else(|| ScoringError::Data("missing 'moderate' tier".to_string()))?;
        let high = tier_max(table, "high")?;

        Self::new(low, moderate, high)
    }

    pub fn to_json(&self) -> Value {
        let mut table = json!({
            "low": { "max": self.low_max },
            "moderate": { "max": self.moderate_max },
        });
        if let (Some(high), Some(obj)) = (self.high_max, table.as_object_mut()) {
            obj.insert("high".to_string(), json!({ "max": high }));
        }
        table
    }

    /// First matching tier wins, evaluated low, then moderate, else high.
    /// Negative totals land in the low tier; totals above every tier are high.
    pub fn classify(&self, total: i32) -> RiskLevel {
        if total <= self.low_max {
            RiskLevel::Low
        } else if total <= self.moderate_max {
            RiskLevel::Moderate
        } else {
            RiskLevel::High
        }
    }
}

fn tier_max(table: &Map<String, Value>, tier: &str) -> Result<Option<i32>, ScoringError> {
    let Some(entry) = table.get(tier) else {
        return Ok(None);
    };
    entry
        .get("max")
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| ScoringError::Data(format!("tier '{tier}' must carry an integer 'max'")))
}

/// Decodes the stored/transmitted multi-select id list.
///
/// The canonical form is a JSON array of integers. Absent or blank input is an
/// empty selection. Ids come back sorted and de-duplicated.
pub fn decode_option_ids(raw: Option<&str>) -> Result<Vec<i64>, ScoringError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    let ids: Vec<i64> = serde_json::from_str(raw).map_err(|e| {
        ScoringError::Validation(format!("option ids must be a JSON array of integers ({e})"))
    })?;
    Ok(canonical_ids(ids))
}

pub fn encode_option_ids(ids: &[i64]) -> String {
    let joined = canonical_ids(ids.to_vec())
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{joined}]")
}

fn canonical_ids(ids: Vec<i64>) -> Vec<i64> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(i64),
    Multiple(Vec<i64>),
    Direct(i32),
}

impl Selection {
    /// Builds a selection from the raw answer fields, checking it fits the question type.
    pub fn from_input(
        kind: QuestionKind,
        option_id: Option<i64>,
        selected_option_ids: Option<&str>,
        score: Option<i32>,
    ) -> Result<Self, ScoringError> {
        match kind {
            QuestionKind::SingleChoice => option_id.map(Selection::Single).ok_or_else(|| {
                ScoringError::Validation("single choice answers need an option_id".to_string())
            }),
            QuestionKind::CheckboxMultiple => {
                if option_id.is_some() {
                    return Err(ScoringError::Validation(
                        "multiple choice answers use selected_option_ids".to_string(),
                    ));
                }
                decode_option_ids(selected_option_ids).map(Selection::Multiple)
            }
            QuestionKind::Text => Ok(Selection::Direct(score.unwrap_or(0))),
        }
    }

    pub fn option_id(&self) -> Option<i64> {
        match self {
            Selection::Single(id) => Some(*id),
            _ => None,
        }
    }

    pub fn encoded_ids(&self) -> Option<String> {
        match self {
            Selection::Multiple(ids) => Some(encode_option_ids(ids)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionScore {
    pub id: i64,
    pub score: i32,
}

/// Score contributed by one answer. `options` are the question's own options;
/// an id outside that set is a lookup failure, never a zero.
pub fn score_selection(
    kind: QuestionKind,
    selection: &Selection,
    options: &[OptionScore],
) -> Result<i32, ScoringError> {
    let lookup = |id: i64| {
        options
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.score)
            .ok_or_else(|| ScoringError::NotFound(format!("option {id}")))
    };

    match (kind, selection) {
        (QuestionKind::SingleChoice, Selection::Single(id)) => lookup(*id),
        (QuestionKind::CheckboxMultiple, Selection::Multiple(ids)) => {
            let mut sum: i32 = 0;
            for id in canonical_ids(ids.clone()) {
                let score = lookup(id)?;
                sum = sum
                    .checked_add(score)
                    .ok_or_else(|| ScoringError::Validation("answer score overflow".to_string()))?;
            }
            Ok(sum)
        }
        (QuestionKind::Text, Selection::Direct(score)) => Ok(*score),
        (kind, _) => Err(ScoringError::Validation(format!(
            "selection does not match question type {kind:?}"
        ))),
    }
}

/// Incremental total update: remove the answer's previous contribution and add the new one.
/// Creation passes `previous = 0`, deletion passes `next = 0`.
pub fn adjust_total(total: i32, previous: i32, next: i32) -> Result<i32, ScoringError> {
    total
        .checked_sub(previous)
        .and_then(|t| t.checked_add(next))
        .ok_or_else(|| ScoringError::Validation("response total overflow".to_string()))
}

pub fn sum_scores<I: IntoIterator<Item = i32>>(scores: I) -> Result<i32, ScoringError> {
    scores.into_iter().try_fold(0i32, |acc, s| {
        acc.checked_add(s)
            .ok_or_else(|| ScoringError::Validation("response total overflow".to_string()))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub total_score: i32,
    pub max_score: i32,
    pub risk_level: RiskLevel,
}

pub fn evaluate(total_score: i32, max_score: i32, thresholds: &RiskThresholds) -> ScoreResult {
    ScoreResult {
        total_score,
        max_score,
        risk_level: thresholds.classify(total_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn options() -> Vec<OptionScore> {
        vec![
            OptionScore { id: 1, score: 2 },
            OptionScore { id: 2, score: 4 },
            OptionScore { id: 3, score: 5 },
        ]
    }

    fn thresholds() -> RiskThresholds {
        RiskThresholds::from_json(&json!({"low": {"max": 10}, "moderate": {"max": 20}})).unwrap()
    }

    #[test]
    fn classifies_threshold_boundaries() {
        let t = thresholds();
        assert_eq!(t.classify(10), RiskLevel::Low);
        assert_eq!(t.classify(11), RiskLevel::Moderate);
        assert_eq!(t.classify(20), RiskLevel::Moderate);
        assert_eq!(t.classify(21), RiskLevel::High);
        assert_eq!(t.classify(21).label(), "High Risk");
    }

    #[test]
    fn negative_and_oversized_totals_are_not_clamped() {
        let t = thresholds();
        assert_eq!(t.classify(-5), RiskLevel::Low);
        assert_eq!(t.classify(i32::MAX), RiskLevel::High);
    }

    #[test]
    fn classification_is_monotonic() {
        let t = RiskThresholds::new(3, 7, Some(12)).unwrap();
        let mut previous = t.classify(-20);
        for total in -19..40 {
            let current = t.classify(total);
            assert!(current >= previous, "tier dropped at total {total}");
            previous = current;
        }
    }

    #[test]
    fn malformed_tables_are_data_errors() {
        let cases = vec![
            json!([]),
            json!({"low": {"max": 10}}),
            json!({"moderate": {"max": 10}}),
            json!({"low": {"max": 10}, "moderate": {"max": 5}}),
            json!({"low": {"max": "ten"}, "moderate": {"max": 20}}),
            json!({"low": {"max": 1}, "moderate": {"max": 2}, "medium": {"max": 3}}),
            json!({"low": {"max": 1}, "moderate": {"max": 5}, "high": {"max": 4}}),
        ];
        for case in cases {
            let err = RiskThresholds::from_json(&case).unwrap_err();
            assert!(matches!(err, ScoringError::Data(_)), "{case} gave {err:?}");
        }
    }

    #[test]
    fn threshold_json_survives_storage() {
        let t = RiskThresholds::new(4, 9, Some(30)).unwrap();
        assert_eq!(RiskThresholds::from_json(&t.to_json()).unwrap(), t);
        let without_high = thresholds().to_json();
        assert!(without_high.get("high").is_none());
    }

    #[test]
    fn multi_select_sums_selected_options() {
        let sel = Selection::Multiple(vec![1, 3]);
        assert_eq!(
            score_selection(QuestionKind::CheckboxMultiple, &sel, &options()).unwrap(),
            7
        );
    }

    #[test]
    fn multi_select_is_order_independent() {
        let opts = vec![OptionScore { id: 2, score: 4 }, OptionScore { id: 5, score: 9 }];
        let a = score_selection(QuestionKind::CheckboxMultiple, &Selection::Multiple(vec![2, 5]), &opts);
        let b = score_selection(QuestionKind::CheckboxMultiple, &Selection::Multiple(vec![5, 2]), &opts);
        assert_eq!(a.unwrap(), 13);
        assert_eq!(b.unwrap(), 13);
    }

    #[test]
    fn empty_multi_select_scores_zero() {
        for raw in [None, Some(""), Some("  "), Some("[]")] {
            let sel = Selection::from_input(QuestionKind::CheckboxMultiple, None, raw, None).unwrap();
            assert_eq!(
                score_selection(QuestionKind::CheckboxMultiple, &sel, &options()).unwrap(),
                0
            );
        }
    }

    #[test]
    fn unparseable_id_list_is_validation_error() {
        for raw in ["1,3", "[1, \"x\"]", "{\"ids\": [1]}", "[1.5]"] {
            let err = decode_option_ids(Some(raw)).unwrap_err();
            assert!(matches!(err, ScoringError::Validation(_)), "{raw}");
        }
    }

    #[test]
    fn id_list_encoding_is_canonical() {
        assert_eq!(encode_option_ids(&[3, 1, 3]), "[1,3]");
        assert_eq!(encode_option_ids(&[]), "[]");
        assert_eq!(decode_option_ids(Some("[3, 1, 3]")).unwrap(), vec![1, 3]);
    }

    #[test]
    fn unknown_option_aborts_instead_of_scoring_zero() {
        let single = score_selection(QuestionKind::SingleChoice, &Selection::Single(42), &options());
        assert_eq!(single, Err(ScoringError::NotFound("option 42".to_string())));

        let multi = score_selection(
            QuestionKind::CheckboxMultiple,
            &Selection::Multiple(vec![1, 42]),
            &options(),
        );
        assert!(matches!(multi, Err(ScoringError::NotFound(_))));
    }

    #[test]
    fn selection_must_fit_question_type() {
        assert!(matches!(
            Selection::from_input(QuestionKind::SingleChoice, None, Some("[1]"), None),
            Err(ScoringError::Validation(_))
        ));
        assert!(matches!(
            Selection::from_input(QuestionKind::CheckboxMultiple, Some(1), None, None),
            Err(ScoringError::Validation(_))
        ));
        assert!(matches!(
            score_selection(QuestionKind::Text, &Selection::Single(1), &options()),
            Err(ScoringError::Validation(_))
        ));
    }

    #[test]
    fn text_answers_use_supplied_score() {
        let sel = Selection::from_input(QuestionKind::Text, None, None, Some(6)).unwrap();
        assert_eq!(score_selection(QuestionKind::Text, &sel, &[]).unwrap(), 6);
        let default = Selection::from_input(QuestionKind::Text, None, None, None).unwrap();
        assert_eq!(score_selection(QuestionKind::Text, &default, &[]).unwrap(), 0);
    }

    #[test]
    fn deleting_answer_subtracts_its_score() {
        assert_eq!(adjust_total(15, 7, 0).unwrap(), 8);
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(adjust_total(i32::MAX, 0, 1).is_err());
        assert!(sum_scores([i32::MAX, 1]).is_err());
    }

    #[test]
    fn scoring_twice_is_idempotent() {
        let t = thresholds();
        let first = evaluate(14, 30, &t);
        let second = evaluate(14, 30, &t);
        assert_eq!(first, second);
        assert_eq!(first.risk_level, RiskLevel::Moderate);
    }

    #[test]
    fn total_matches_answer_sum_after_random_edits() {
        let opts: Vec<OptionScore> = (1..=6).map(|id| OptionScore { id, score: id as i32 * 3 - 4 }).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let mut answers: BTreeMap<u32, i32> = BTreeMap::new();
        let mut total = 0;

        for step in 0..500u32 {
            let question = rng.gen_range(0..8u32);
            let pick: Vec<i64> = (1..=6).filter(|_| rng.gen_bool(0.4)).collect();
            let next = score_selection(QuestionKind::CheckboxMultiple, &Selection::Multiple(pick), &opts).unwrap();

            match (rng.gen_range(0..3), answers.get(&question).copied()) {
                (0, Some(previous)) => {
                    total = adjust_total(total, previous, 0).unwrap();
                    answers.remove(&question);
                }
                (_, Some(previous)) => {
                    total = adjust_total(total, previous, next).unwrap();
                    answers.insert(question, next);
                }
                (_, None) => {
                    total = adjust_total(total, 0, next).unwrap();
                    answers.insert(question, next);
                }
            }

            assert_eq!(
                total,
                sum_scores(answers.values().copied()).unwrap(),
                "diverged at step {step}"
            );
        }
    }

    #[test]
    fn risk_level_serializes_as_label() {
        let value = serde_json::to_value(evaluate(21, 40, &thresholds())).unwrap();
        assert_eq!(value["risk_level"], "High Risk");
        assert_eq!(value["total_score"], 21);
        assert_eq!(value["max_score"], 40);
    }
}
