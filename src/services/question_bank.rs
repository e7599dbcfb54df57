use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use crate::core::security::Principal;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, Question, QuestionOption};
use crate::db::types::QuestionType;
use crate::repositories;
use crate::services::access::ensure_exam_manager;
use crate::services::errors::LmsError;

pub(crate) const TRUE_OPTION: &str = "true";
pub(crate) const FALSE_OPTION: &str = "false";

/// Author input for a question, before validation.
#[derive(Debug, Clone)]
pub(crate) struct QuestionSpec {
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) correct_answer: Option<String>,
    pub(crate) points: f64,
    pub(crate) order_num: Option<i32>,
    pub(crate) explanation: Option<String>,
}

/// Partial edit; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub(crate) struct QuestionPatch {
    pub(crate) question_text: Option<String>,
    pub(crate) question_type: Option<QuestionType>,
    pub(crate) options: Option<Vec<QuestionOption>>,
    pub(crate) correct_answer: Option<String>,
    pub(crate) points: Option<f64>,
    pub(crate) order_num: Option<i32>,
    pub(crate) explanation: Option<String>,
}

/// How an answer to a question is judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AnswerKey {
    MultipleChoice { correct_option: String },
    TrueFalse { correct_option: String },
    ShortAnswer { reference: Option<String> },
    Essay,
}

impl AnswerKey {
    /// Builds the key from stored question fields, enforcing the per-type rules.
    pub(crate) fn from_parts(
        question_type: QuestionType,
        options: &[QuestionOption],
        correct_answer: Option<&str>,
    ) -> Result<Self, LmsError> {
        match question_type {
            QuestionType::MultipleChoice => {
                if options.is_empty() {
                    return Err(LmsError::validation(
                        "options",
                        "multiple choice questions need at least one option",
                    ));
                }
                let correct = correct_answer.ok_or_else(|| {
                    LmsError::validation("correct_answer", "a correct option is required")
                })?;
                if !options.iter().any(|option| option.id == correct) {
                    return Err(LmsError::validation(
                        "correct_answer",
                        format!("'{correct}' does not match any option id"),
                    ));
                }
                Ok(AnswerKey::MultipleChoice { correct_option: correct.to_string() })
            }
            QuestionType::TrueFalse => {
                let correct = correct_answer.ok_or_else(|| {
                    LmsError::validation("correct_answer", "a correct option is required")
                })?;
                if correct != TRUE_OPTION && correct != FALSE_OPTION {
                    return Err(LmsError::validation(
                        "correct_answer",
                        "must be 'true' or 'false'",
                    ));
                }
                Ok(AnswerKey::TrueFalse { correct_option: correct.to_string() })
            }
            QuestionType::ShortAnswer => {
                Ok(AnswerKey::ShortAnswer { reference: correct_answer.map(str::to_string) })
            }
            QuestionType::Essay => Ok(AnswerKey::Essay),
        }
    }

    pub(crate) fn for_question(question: &Question) -> Result<Self, LmsError> {
        Self::from_parts(
            question.question_type,
            &question.options.0,
            question.correct_answer.as_deref(),
        )
    }
}

/// A spec that passed validation, with options normalised for its type.
#[derive(Debug, Clone)]
pub(crate) struct ValidatedQuestion {
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) correct_answer: Option<String>,
    pub(crate) points: f64,
    pub(crate) order_num: Option<i32>,
    pub(crate) explanation: Option<String>,
}

pub(crate) fn validate_spec(spec: QuestionSpec) -> Result<ValidatedQuestion, LmsError> {
    let question_text = spec.question_text.trim().to_string();
    if question_text.is_empty() {
        return Err(LmsError::validation("question_text", "must not be empty"));
    }
    if !spec.points.is_finite() || spec.points <= 0.0 {
        return Err(LmsError::validation("points", "must be greater than zero"));
    }

    let options = match spec.question_type {
        QuestionType::MultipleChoice => {
            let mut seen = HashSet::new();
            for option in &spec.options {
                if option.id.trim().is_empty() {
                    return Err(LmsError::validation("options", "option ids must not be empty"));
                }
                if !seen.insert(option.id.as_str()) {
                    return Err(LmsError::validation(
                        "options",
                        format!("duplicate option id '{}'", option.id),
                    ));
                }
            }
            spec.options
        }
        QuestionType::TrueFalse => {
            if spec.options.is_empty() {
                true_false_options()
            } else {
                let ids: HashSet<&str> = spec.options.iter().map(|o| o.id.as_str()).collect();
                let expected: HashSet<&str> = [TRUE_OPTION, FALSE_OPTION].into_iter().collect();
                if spec.options.len() != 2 || ids != expected {
                    return Err(LmsError::validation(
                        "options",
                        "true/false questions use the option ids 'true' and 'false'",
                    ));
                }
                spec.options
            }
        }
        QuestionType::ShortAnswer | QuestionType::Essay => {
            if !spec.options.is_empty() {
                return Err(LmsError::validation(
                    "options",
                    "options are only allowed for choice questions",
                ));
            }
            Vec::new()
        }
    };

    let correct_answer = spec
        .correct_answer
        .filter(|value| !value.trim().is_empty());

    AnswerKey::from_parts(spec.question_type, &options, correct_answer.as_deref())?;

    Ok(ValidatedQuestion {
        question_text,
        question_type: spec.question_type,
        options,
        correct_answer,
        points: spec.points,
        order_num: spec.order_num,
        explanation: spec.explanation.filter(|value| !value.trim().is_empty()),
    })
}

fn true_false_options() -> Vec<QuestionOption> {
    vec![
        QuestionOption { id: TRUE_OPTION.to_string(), text: "True".to_string() },
        QuestionOption { id: FALSE_OPTION.to_string(), text: "False".to_string() },
    ]
}

/// Applies a patch on top of the stored question.
pub(crate) fn merge_patch(current: &Question, patch: QuestionPatch) -> QuestionSpec {
    let type_changed =
        patch.question_type.is_some_and(|question_type| question_type != current.question_type);
    QuestionSpec {
        question_text: patch.question_text.unwrap_or_else(|| current.question_text.clone()),
        question_type: patch.question_type.unwrap_or(current.question_type),
        options: match patch.options {
            Some(options) => options,
            None if type_changed => Vec::new(),
            None => current.options.0.clone(),
        },
        correct_answer: match patch.correct_answer {
            Some(answer) => Some(answer),
            None if type_changed => None,
            None => current.correct_answer.clone(),
        },
        points: patch.points.unwrap_or(current.points),
        order_num: Some(patch.order_num.unwrap_or(current.order_num)),
        explanation: patch.explanation.or_else(|| current.explanation.clone()),
    }
}

/// True when the edit would change how existing answers are judged.
pub(crate) fn changes_grading(current: &Question, next: &ValidatedQuestion) -> bool {
    current.question_type != next.question_type
        || current.options.0 != next.options
        || current.correct_answer != next.correct_answer
}

async fn load_managed_exam(
    executor: impl sqlx::PgExecutor<'_>,
    principal: &Principal,
    exam_id: &str,
) -> Result<Exam, LmsError> {
    let exam = repositories::exams::find_by_id(executor, exam_id)
        .await?
        .ok_or(LmsError::NotFound("Exam"))?;
    ensure_exam_manager(principal, &exam)?;
    Ok(exam)
}

pub(crate) async fn add_question(
    pool: &PgPool,
    principal: &Principal,
    exam_id: &str,
    spec: QuestionSpec,
) -> Result<Question, LmsError> {
    let validated = validate_spec(spec)?;
    let mut tx = pool.begin().await?;

    let exam = load_managed_exam(&mut *tx, principal, exam_id).await?;

    let order_num = match validated.order_num {
        Some(order_num) => order_num,
        None => repositories::questions::next_order_num(&mut *tx, &exam.id).await?,
    };

    let id = Uuid::new_v4().to_string();
    let question = repositories::questions::create(
        &mut *tx,
        repositories::questions::CreateQuestion {
            id: &id,
            exam_id: &exam.id,
            question_text: &validated.question_text,
            question_type: validated.question_type,
            options: validated.options,
            correct_answer: validated.correct_answer,
            points: validated.points,
            order_num,
            explanation: validated.explanation.as_deref(),
            created_at: primitive_now_utc(),
        },
    )
    .await?;

    repositories::exams::mark_totals_stale(&mut *tx, &exam.id).await?;
    tx.commit().await?;

    tracing::info!(exam_id = %exam.id, question_id = %question.id, "Question added");
    Ok(question)
}

pub(crate) async fn list_questions(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<Vec<Question>, LmsError> {
    Ok(repositories::questions::list_by_exam(executor, exam_id).await?)
}

pub(crate) async fn update_question(
    pool: &PgPool,
    principal: &Principal,
    question_id: &str,
    patch: QuestionPatch,
) -> Result<Question, LmsError> {
    let mut tx = pool.begin().await?;

    let current = repositories::questions::lock_for_update(&mut *tx, question_id)
        .await?
        .ok_or(LmsError::NotFound("Question"))?;
    load_managed_exam(&mut *tx, principal, &current.exam_id).await?;

    let next = validate_spec(merge_patch(&current, patch))?;

    if changes_grading(&current, &next)
        && repositories::questions::count_answers(&mut *tx, &current.id).await? > 0
    {
        return Err(LmsError::validation(
            "question",
            "answers were already recorded; type, options and correct answer are frozen",
        ));
    }

    let points_changed = current.points != next.points;
    let updated = repositories::questions::update(
        &mut *tx,
        &current.id,
        repositories::questions::UpdateQuestion {
            question_text: next.question_text,
            question_type: next.question_type,
            options: next.options,
            correct_answer: next.correct_answer,
            points: next.points,
            order_num: next.order_num.unwrap_or(current.order_num),
            explanation: next.explanation,
            updated_at: primitive_now_utc(),
        },
    )
    .await?;

    if points_changed {
        repositories::exams::mark_totals_stale(&mut *tx, &current.exam_id).await?;
    }
    tx.commit().await?;

    tracing::info!(question_id = %updated.id, points_changed, "Question updated");
    Ok(updated)
}

pub(crate) async fn delete_question(
    pool: &PgPool,
    principal: &Principal,
    question_id: &str,
) -> Result<(), LmsError> {
    let mut tx = pool.begin().await?;

    let question = repositories::questions::lock_for_update(&mut *tx, question_id)
        .await?
        .ok_or(LmsError::NotFound("Question"))?;
    load_managed_exam(&mut *tx, principal, &question.exam_id).await?;

    if repositories::questions::count_answers(&mut *tx, &question.id).await? > 0 {
        return Err(LmsError::validation(
            "question",
            "answers were already recorded for this question",
        ));
    }

    repositories::questions::delete_by_id(&mut *tx, &question.id).await?;
    repositories::exams::mark_totals_stale(&mut *tx, &question.exam_id).await?;
    tx.commit().await?;

    tracing::info!(question_id, exam_id = %question.exam_id, "Question deleted");
    Ok(())
}

/// Current total points of the exam, recomputed first when marked stale.
pub(crate) async fn ensure_totals(
    executor: impl sqlx::PgExecutor<'_>,
    exam: &Exam,
) -> Result<f64, LmsError> {
    if exam.total_points_stale {
        Ok(repositories::exams::recompute_totals(executor, &exam.id).await?)
    } else {
        Ok(exam.total_points)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use sqlx::types::Json;
    use time::macros::datetime;

    use super::*;

    pub(crate) fn option(id: &str) -> QuestionOption {
        QuestionOption { id: id.to_string(), text: format!("Option {id}") }
    }

    pub(crate) fn question(
        id: &str,
        question_type: QuestionType,
        correct_answer: Option<&str>,
        points: f64,
    ) -> Question {
        let options = match question_type {
            QuestionType::MultipleChoice => vec![option("A"), option("B"), option("C")],
            QuestionType::TrueFalse => true_false_options(),
            QuestionType::ShortAnswer | QuestionType::Essay => Vec::new(),
        };
        let now = datetime!(2025-01-02 10:00);
        Question {
            id: id.to_string(),
            exam_id: "exam-1".to_string(),
            question_text: format!("Question {id}"),
            question_type,
            options: Json(options),
            correct_answer: correct_answer.map(str::to_string),
            points,
            order_num: 1,
            explanation: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{option, question};
    use super::*;

    fn spec(question_type: QuestionType) -> QuestionSpec {
        QuestionSpec {
            question_text: "Which organelle produces ATP?".to_string(),
            question_type,
            options: Vec::new(),
            correct_answer: None,
            points: 5.0,
            order_num: None,
            explanation: None,
        }
    }

    fn field_of(err: LmsError) -> &'static str {
        match err {
            LmsError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn multiple_choice_requires_options() {
        let mut input = spec(QuestionType::MultipleChoice);
        input.correct_answer = Some("A".to_string());
        assert_eq!(field_of(validate_spec(input).unwrap_err()), "options");
    }

    #[test]
    fn multiple_choice_correct_answer_must_reference_option() {
        let mut input = spec(QuestionType::MultipleChoice);
        input.options = vec![option("A"), option("B")];
        input.correct_answer = Some("Option B".to_string());
        assert_eq!(field_of(validate_spec(input).unwrap_err()), "correct_answer");
    }

    #[test]
    fn duplicate_option_ids_are_rejected() {
        let mut input = spec(QuestionType::MultipleChoice);
        input.options = vec![option("A"), option("A")];
        input.correct_answer = Some("A".to_string());
        assert_eq!(field_of(validate_spec(input).unwrap_err()), "options");
    }

    #[test]
    fn points_must_be_positive() {
        for points in [0.0, -1.0, f64::NAN] {
            let mut input = spec(QuestionType::Essay);
            input.points = points;
            assert_eq!(field_of(validate_spec(input).unwrap_err()), "points");
        }
    }

    #[test]
    fn true_false_gets_default_options() {
        let mut input = spec(QuestionType::TrueFalse);
        input.correct_answer = Some("false".to_string());
        let validated = validate_spec(input).unwrap();
        let ids: Vec<_> = validated.options.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["true", "false"]);
    }

    #[test]
    fn true_false_answer_is_case_sensitive() {
        let mut input = spec(QuestionType::TrueFalse);
        input.correct_answer = Some("True".to_string());
        assert_eq!(field_of(validate_spec(input).unwrap_err()), "correct_answer");
    }

    #[test]
    fn essay_rejects_options() {
        let mut input = spec(QuestionType::Essay);
        input.options = vec![option("A")];
        assert_eq!(field_of(validate_spec(input).unwrap_err()), "options");
    }

    #[test]
    fn answer_key_matches_question_type() {
        let mc = question("q1", QuestionType::MultipleChoice, Some("B"), 10.0);
        assert_eq!(
            AnswerKey::for_question(&mc).unwrap(),
            AnswerKey::MultipleChoice { correct_option: "B".to_string() }
        );
        let essay = question("q2", QuestionType::Essay, None, 10.0);
        assert_eq!(AnswerKey::for_question(&essay).unwrap(), AnswerKey::Essay);
    }

    #[test]
    fn points_only_patch_does_not_change_grading() {
        let current = question("q1", QuestionType::MultipleChoice, Some("B"), 10.0);
        let patch = QuestionPatch { points: Some(15.0), ..QuestionPatch::default() };
        let next = validate_spec(merge_patch(&current, patch)).unwrap();
        assert!(!changes_grading(&current, &next));
        assert_eq!(next.points, 15.0);
    }

    #[test]
    fn changing_correct_answer_changes_grading() {
        let current = question("q1", QuestionType::MultipleChoice, Some("B"), 10.0);
        let patch =
            QuestionPatch { correct_answer: Some("C".to_string()), ..QuestionPatch::default() };
        let next = validate_spec(merge_patch(&current, patch)).unwrap();
        assert!(changes_grading(&current, &next));
    }

    #[test]
    fn type_change_drops_stale_options() {
        let current = question("q1", QuestionType::MultipleChoice, Some("B"), 10.0);
        let patch =
            QuestionPatch { question_type: Some(QuestionType::Essay), ..QuestionPatch::default() };
        let next = validate_spec(merge_patch(&current, patch)).unwrap();
        assert!(next.options.is_empty());
        assert_eq!(next.correct_answer, None);
    }
}
