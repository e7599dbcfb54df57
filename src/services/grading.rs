use std::collections::HashMap;

use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::core::metrics::{ATTEMPTS_GRADED, MANUAL_GRADES};
use crate::core::security::Principal;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Answer, Attempt, Question};
use crate::db::types::AttemptStatus;
use crate::repositories;
use crate::services::access::ensure_exam_manager;
use crate::services::errors::LmsError;
use crate::services::question_bank::AnswerKey;

/// Grading outcome for one answer record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AnswerGrade {
    pub(crate) answer_id: String,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) is_correct: bool,
    pub(crate) auto_graded: bool,
    pub(crate) graded_by: Option<String>,
    pub(crate) feedback: Option<String>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
}

impl AnswerGrade {
    pub(crate) fn is_resolved(&self) -> bool {
        self.graded_at.is_some()
    }

    fn differs_from(&self, answer: &Answer) -> bool {
        answer.score != self.score
            || answer.max_score != Some(self.max_score)
            || answer.is_correct != self.is_correct
            || answer.auto_graded != self.auto_graded
            || answer.graded_by != self.graded_by
            || answer.feedback != self.feedback
            || answer.graded_at != self.graded_at
    }
}

/// Result of one grading pass over every answer record of an attempt.
#[derive(Debug, Clone)]
pub(crate) struct GradingPass {
    pub(crate) grades: Vec<AnswerGrade>,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) pending: usize,
}

impl GradingPass {
    pub(crate) fn fully_graded(&self) -> bool {
        self.pending == 0
    }

    /// Status after this pass. Never moves backwards and only leaves
    /// `submitted` once nothing is pending.
    pub(crate) fn next_status(&self, current: AttemptStatus) -> AttemptStatus {
        match current {
            AttemptStatus::Submitted if self.fully_graded() => AttemptStatus::Graded,
            other => other,
        }
    }
}

/// A graded attempt as persisted after the pass.
#[derive(Debug, Clone)]
pub(crate) struct GradedAttempt {
    pub(crate) attempt: Attempt,
    pub(crate) answers: Vec<Answer>,
    pub(crate) pending: usize,
}

/// Scores one answer record against its question.
pub(crate) fn grade_answer(
    question: &Question,
    answer: &Answer,
    now: PrimitiveDateTime,
) -> Result<AnswerGrade, LmsError> {
    let max_score = answer.max_score.unwrap_or(question.points);
    let raw = answer.answer.as_deref();

    let grade = match AnswerKey::for_question(question)? {
        AnswerKey::MultipleChoice { correct_option } | AnswerKey::TrueFalse { correct_option } => {
            let is_correct = raw == Some(correct_option.as_str());
            let score = if is_correct { max_score } else { 0.0 };
            let unchanged = answer.auto_graded
                && answer.graded_at.is_some()
                && answer.score == score
                && answer.is_correct == is_correct
                && answer.max_score == Some(max_score);
            AnswerGrade {
                answer_id: answer.id.clone(),
                score,
                max_score,
                is_correct,
                auto_graded: true,
                graded_by: None,
                feedback: answer.feedback.clone(),
                graded_at: if unchanged { answer.graded_at } else { Some(now) },
            }
        }
        AnswerKey::ShortAnswer { .. } | AnswerKey::Essay => {
            if answer.graded_at.is_some() {
                AnswerGrade {
                    answer_id: answer.id.clone(),
                    score: answer.score,
                    max_score,
                    is_correct: answer.is_correct,
                    auto_graded: false,
                    graded_by: answer.graded_by.clone(),
                    feedback: answer.feedback.clone(),
                    graded_at: answer.graded_at,
                }
            } else {
                AnswerGrade {
                    answer_id: answer.id.clone(),
                    score: 0.0,
                    max_score,
                    is_correct: false,
                    auto_graded: false,
                    graded_by: None,
                    feedback: answer.feedback.clone(),
                    graded_at: None,
                }
            }
        }
    };

    Ok(grade)
}

/// Grades every answer record and aggregates. Pure; nothing is written.
pub(crate) fn grade_answers(
    questions: &[Question],
    answers: &[Answer],
    now: PrimitiveDateTime,
) -> Result<GradingPass, LmsError> {
    let by_id: HashMap<&str, &Question> =
        questions.iter().map(|question| (question.id.as_str(), question)).collect();

    let mut grades = Vec::with_capacity(answers.len());
    for answer in answers {
        let question =
            by_id.get(answer.question_id.as_str()).ok_or(LmsError::NotFound("Question"))?;
        grades.push(grade_answer(question, answer, now)?);
    }

    let score = grades.iter().map(|grade| grade.score).sum();
    let max_score = grades.iter().map(|grade| grade.max_score).sum();
    let pending = grades.iter().filter(|grade| !grade.is_resolved()).count();

    Ok(GradingPass { grades, score, max_score, pending })
}

/// Grades an attempt whose row is already locked by the caller's transaction.
async fn grade_locked(
    conn: &mut PgConnection,
    attempt: Attempt,
    now: PrimitiveDateTime,
) -> Result<GradedAttempt, LmsError> {
    if attempt.status == AttemptStatus::InProgress {
        return Err(LmsError::AttemptNotSubmitted);
    }

    repositories::answers::insert_missing(&mut *conn, &attempt.id, &attempt.exam_id, now).await?;
    let questions = repositories::questions::list_by_exam(&mut *conn, &attempt.exam_id).await?;
    let answers = repositories::answers::list_by_attempt(&mut *conn, &attempt.id).await?;

    let pass = grade_answers(&questions, &answers, now)?;

    let mut stored = Vec::with_capacity(answers.len());
    for (answer, grade) in answers.into_iter().zip(&pass.grades) {
        if !grade.differs_from(&answer) {
            stored.push(answer);
            continue;
        }
        let updated = repositories::answers::update_grade(
            &mut *conn,
            &answer.id,
            repositories::answers::GradeUpdate {
                score: grade.score,
                max_score: Some(grade.max_score),
                is_correct: grade.is_correct,
                auto_graded: grade.auto_graded,
                graded_by: grade.graded_by.as_deref(),
                feedback: grade.feedback.as_deref(),
                graded_at: grade.graded_at,
                updated_at: now,
            },
        )
        .await?;
        stored.push(updated);
    }

    let status = pass.next_status(attempt.status);
    debug_assert!(attempt.status.can_advance_to(status));
    let graded_at = match attempt.graded_at {
        Some(previous) => Some(previous),
        None if status.is_fully_graded() => Some(now),
        None => None,
    };

    let attempt = repositories::attempts::update_grading(
        &mut *conn,
        &attempt.id,
        repositories::attempts::GradingUpdate {
            score: pass.score,
            max_score: pass.max_score,
            status,
            graded_at,
            updated_at: now,
        },
    )
    .await?;

    Ok(GradedAttempt { attempt, answers: stored, pending: pass.pending })
}

fn record_outcome(graded: &GradedAttempt) {
    let outcome = if graded.pending == 0 { "graded" } else { "pending_manual" };
    metrics::counter!(ATTEMPTS_GRADED, "outcome" => outcome).increment(1);
    tracing::info!(
        attempt_id = %graded.attempt.id,
        score = graded.attempt.score,
        max_score = graded.attempt.max_score,
        pending = graded.pending,
        status = ?graded.attempt.status,
        "Attempt graded"
    );
}

/// Runs a grading pass as one transaction. Any failure rolls back every
/// answer and aggregate update, leaving the attempt in its prior state.
pub(crate) async fn grade_attempt(
    pool: &PgPool,
    attempt_id: &str,
    lock_timeout_ms: u64,
) -> Result<GradedAttempt, LmsError> {
    let mut tx = pool.begin().await?;
    repositories::attempts::set_lock_timeout(&mut *tx, lock_timeout_ms).await?;

    let attempt = repositories::attempts::lock_for_update(&mut *tx, attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;

    let graded = grade_locked(&mut *tx, attempt, primitive_now_utc()).await?;
    tx.commit().await?;

    record_outcome(&graded);
    Ok(graded)
}

/// Staff-triggered regrade of an attempt.
pub(crate) async fn regrade_attempt(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
    lock_timeout_ms: u64,
) -> Result<GradedAttempt, LmsError> {
    let attempt = repositories::attempts::find_by_id(pool, attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;
    let exam = repositories::exams::find_by_id(pool, &attempt.exam_id)
        .await?
        .ok_or(LmsError::NotFound("Exam"))?;
    ensure_exam_manager(principal, &exam)?;

    grade_attempt(pool, attempt_id, lock_timeout_ms).await
}

pub(crate) struct ManualGrade<'a> {
    pub(crate) score: f64,
    pub(crate) feedback: Option<&'a str>,
}

/// Rejects negative and non-finite scores before the answer's maximum is known.
pub(crate) fn check_score_floor(score: f64) -> Result<(), LmsError> {
    if !score.is_finite() || score < 0.0 {
        return Err(LmsError::ScoreOutOfRange { score, max: None });
    }
    Ok(())
}

pub(crate) fn check_manual_score(score: f64, max_score: f64) -> Result<(), LmsError> {
    check_score_floor(score)?;
    if score > max_score {
        return Err(LmsError::ScoreOutOfRange { score, max: Some(max_score) });
    }
    Ok(())
}

/// Records a grader's score for a short-answer or essay record and recomputes
/// the attempt aggregate in the same transaction.
pub(crate) async fn record_manual_grade(
    pool: &PgPool,
    principal: &Principal,
    answer_id: &str,
    grade: ManualGrade<'_>,
    lock_timeout_ms: u64,
) -> Result<GradedAttempt, LmsError> {
    check_score_floor(grade.score)?;

    let mut tx = pool.begin().await?;
    repositories::attempts::set_lock_timeout(&mut *tx, lock_timeout_ms).await?;

    let answer = repositories::answers::find_by_id(&mut *tx, answer_id)
        .await?
        .ok_or(LmsError::NotFound("Answer"))?;
    let attempt = repositories::attempts::lock_for_update(&mut *tx, &answer.attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;
    let exam = repositories::exams::find_by_id(&mut *tx, &attempt.exam_id)
        .await?
        .ok_or(LmsError::NotFound("Exam"))?;
    ensure_exam_manager(principal, &exam)?;

    if attempt.status == AttemptStatus::InProgress {
        return Err(LmsError::AttemptNotSubmitted);
    }

    let question = repositories::questions::find_by_id(&mut *tx, &answer.question_id)
        .await?
        .ok_or(LmsError::NotFound("Question"))?;
    if question.question_type.is_auto_gradable() {
        return Err(LmsError::validation(
            "answer_id",
            "choice questions are graded automatically",
        ));
    }

    let answer = repositories::answers::lock_by_attempt_and_question(
        &mut *tx,
        &attempt.id,
        &question.id,
    )
    .await?
    .ok_or(LmsError::NotFound("Answer"))?;

    let max_score = answer.max_score.unwrap_or(question.points);
    check_manual_score(grade.score, max_score)?;

    let now = primitive_now_utc();
    repositories::answers::update_grade(
        &mut *tx,
        &answer.id,
        repositories::answers::GradeUpdate {
            score: grade.score,
            max_score: Some(max_score),
            is_correct: max_score > 0.0 && grade.score >= max_score,
            auto_graded: false,
            graded_by: Some(principal.id.as_str()),
            feedback: grade.feedback,
            graded_at: Some(now),
            updated_at: now,
        },
    )
    .await?;

    let graded = grade_locked(&mut *tx, attempt, now).await?;
    tx.commit().await?;

    metrics::counter!(MANUAL_GRADES).increment(1);
    tracing::info!(answer_id, grader_id = %principal.id, score = grade.score, "Manual grade recorded");
    record_outcome(&graded);
    Ok(graded)
}

/// Marks a fully graded attempt as reviewed by staff.
pub(crate) async fn mark_reviewed(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
    lock_timeout_ms: u64,
) -> Result<Attempt, LmsError> {
    let mut tx = pool.begin().await?;
    repositories::attempts::set_lock_timeout(&mut *tx, lock_timeout_ms).await?;

    let attempt = repositories::attempts::lock_for_update(&mut *tx, attempt_id)
        .await?
        .ok_or(LmsError::NotFound("Attempt"))?;
    let exam = repositories::exams::find_by_id(&mut *tx, &attempt.exam_id)
        .await?
        .ok_or(LmsError::NotFound("Exam"))?;
    ensure_exam_manager(principal, &exam)?;

    let attempt = match attempt.status {
        AttemptStatus::Reviewed => attempt,
        AttemptStatus::Graded => {
            repositories::attempts::mark_reviewed(&mut *tx, &attempt.id, primitive_now_utc())
                .await?
        }
        AttemptStatus::InProgress => return Err(LmsError::AttemptNotSubmitted),
        AttemptStatus::Submitted => return Err(LmsError::NotFullyGraded),
    };
    tx.commit().await?;

    tracing::info!(attempt_id, reviewer_id = %principal.id, "Attempt reviewed");
    Ok(attempt)
}
