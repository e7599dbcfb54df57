use std::collections::HashMap;

use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::security::Principal;
use crate::db::models::{Answer, Attempt, Exam, Question, QuestionOption};
use crate::db::types::{AttemptStatus, QuestionType};
use crate::repositories;
use crate::services::access::can_manage_exam;
use crate::services::attempt_tracker::{can_view_attempt, load_visible};
use crate::services::errors::LmsError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResultScores {
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct QuestionReview {
    pub(crate) question_id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) answer: Option<String>,
    pub(crate) correct_answer: Option<String>,
    pub(crate) explanation: Option<String>,
    pub(crate) is_correct: bool,
    pub(crate) score: Option<f64>,
    pub(crate) max_score: Option<f64>,
    pub(crate) feedback: Option<String>,
    pub(crate) graded: bool,
}

/// The policy-filtered view of an attempt's outcome.
#[derive(Debug, Clone)]
pub(crate) struct AttemptResult {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) time_taken_seconds: Option<i64>,
    pub(crate) scores: Option<ResultScores>,
    pub(crate) review_available: bool,
    pub(crate) review: Option<Vec<QuestionReview>>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Score as a percentage of max, two decimals, within 0..=100. Zero when max is zero.
pub(crate) fn percentage(score: f64, max_score: f64) -> f64 {
    if max_score <= 0.0 || !score.is_finite() || !max_score.is_finite() {
        return 0.0;
    }
    round2(score / max_score * 100.0).clamp(0.0, 100.0)
}

pub(crate) fn scores_for(attempt: &Attempt, exam: &Exam) -> ResultScores {
    let percentage = percentage(attempt.score, attempt.max_score);
    ResultScores {
        score: attempt.score,
        max_score: attempt.max_score,
        percentage,
        passed: percentage >= exam.passing_score,
    }
}

pub(crate) fn review_eligible(attempt: &Attempt, exam: &Exam) -> bool {
    exam.allow_review && attempt.status.is_fully_graded()
}

fn review_entries(
    questions: &[Question],
    answers: &[Answer],
    include_scores: bool,
) -> Vec<QuestionReview> {
    let by_question: HashMap<&str, &Answer> =
        answers.iter().map(|answer| (answer.question_id.as_str(), answer)).collect();

    questions
        .iter()
        .map(|question| {
            let answer = by_question.get(question.id.as_str()).copied();
            QuestionReview {
                question_id: question.id.clone(),
                question_text: question.question_text.clone(),
                question_type: question.question_type,
                options: question.options.0.clone(),
                answer: answer.and_then(|a| a.answer.clone()),
                correct_answer: question.correct_answer.clone(),
                explanation: question.explanation.clone(),
                is_correct: answer.is_some_and(|a| a.is_correct),
                score: include_scores.then(|| answer.map_or(0.0, |a| a.score)),
                max_score: include_scores
                    .then(|| answer.and_then(|a| a.max_score).unwrap_or(question.points)),
                feedback: answer.and_then(|a| a.feedback.clone()),
                graded: answer.is_some_and(|a| a.graded_at.is_some()),
            }
        })
        .collect()
}

/// Builds the result the principal is allowed to see.
///
/// Exam staff always get scores and the per-question breakdown. The owning
/// student gets scores only when the exam shows results and grading is
/// complete, and the breakdown only when review is allowed.
pub(crate) fn build_result(
    principal: &Principal,
    attempt: &Attempt,
    exam: &Exam,
    questions: &[Question],
    answers: &[Answer],
) -> Result<AttemptResult, LmsError> {
    if !can_view_attempt(principal, attempt, exam) {
        return Err(LmsError::Forbidden("Not enough permissions for this attempt"));
    }

    let staff = can_manage_exam(principal, exam);
    let review_available = review_eligible(attempt, exam);

    let show_scores = staff || (exam.show_results && attempt.status.is_fully_graded());
    let scores = show_scores.then(|| scores_for(attempt, exam));

    let review = if staff {
        Some(review_entries(questions, answers, true))
    } else if review_available {
        Some(review_entries(questions, answers, show_scores))
    } else {
        None
    };

    Ok(AttemptResult {
        attempt_id: attempt.id.clone(),
        exam_id: exam.id.clone(),
        student_id: attempt.student_id.clone(),
        status: attempt.status,
        submitted_at: attempt.submitted_at,
        graded_at: attempt.graded_at,
        time_taken_seconds: attempt.time_taken_seconds,
        scores,
        review_available,
        review,
    })
}

pub(crate) async fn result_for(
    pool: &PgPool,
    principal: &Principal,
    attempt_id: &str,
) -> Result<AttemptResult, LmsError> {
    let (attempt, exam) = load_visible(pool, principal, attempt_id).await?;
    let questions = repositories::questions::list_by_exam(pool, &exam.id).await?;
    let answers = repositories::answers::list_by_attempt(pool, &attempt.id).await?;
    build_result(principal, &attempt, &exam, &questions, &answers)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::db::types::{ExamStatus, UserRole};
    use crate::services::access::fixtures::exam;
    use crate::services::question_bank::fixtures::question;

    fn attempt(status: AttemptStatus, score: f64, max_score: f64) -> Attempt {
        let now = datetime!(2025-01-02 10:00);
        Attempt {
            id: "attempt-1".to_string(),
            exam_id: "exam-1".to_string(),
            student_id: "student-1".to_string(),
            attempt_number: 1,
            question_seed: 5,
            started_at: now,
            submitted_at: Some(now),
            status,
            score,
            max_score,
            time_taken_seconds: Some(600),
            ip_address: None,
            graded_at: Some(now),
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn student() -> Principal {
        Principal { id: "student-1".to_string(), role: UserRole::Student }
    }

    fn instructor() -> Principal {
        Principal { id: "instructor-1".to_string(), role: UserRole::Instructor }
    }

    #[test]
    fn percentage_rounds_and_handles_zero_max() {
        assert_eq!(percentage(17.0, 20.0), 85.0);
        assert_eq!(percentage(1.0, 3.0), 33.33);
        assert_eq!(percentage(2.0, 3.0), 66.67);
        assert_eq!(percentage(5.0, 0.0), 0.0);
    }

    #[test]
    fn percentage_is_bounded_and_passed_matches_threshold() {
        let exam = exam("instructor-1", ExamStatus::Active);
        for (score, max) in [(0.0, 10.0), (7.0, 10.0), (6.99, 10.0), (10.0, 10.0), (3.0, 0.0)] {
            let scores = scores_for(&attempt(AttemptStatus::Graded, score, max), &exam);
            assert!((0.0..=100.0).contains(&scores.percentage));
            assert_eq!(scores.passed, scores.percentage >= exam.passing_score);
        }
    }

    #[test]
    fn hidden_results_show_status_only_to_student() {
        let mut exam = exam("instructor-1", ExamStatus::Active);
        exam.show_results = false;
        exam.allow_review = false;
        let attempt = attempt(AttemptStatus::Graded, 17.0, 20.0);

        let own = build_result(&student(), &attempt, &exam, &[], &[]).unwrap();
        assert_eq!(own.status, AttemptStatus::Graded);
        assert!(own.scores.is_none());
        assert!(own.review.is_none());

        let staff = build_result(&instructor(), &attempt, &exam, &[], &[]).unwrap();
        let scores = staff.scores.unwrap();
        assert_eq!(scores.score, 17.0);
        assert_eq!(scores.percentage, 85.0);
        assert!(scores.passed);
    }

    #[test]
    fn student_sees_scores_once_fully_graded() {
        let exam = exam("instructor-1", ExamStatus::Active);

        let partial = attempt(AttemptStatus::Submitted, 10.0, 20.0);
        let result = build_result(&student(), &partial, &exam, &[], &[]).unwrap();
        assert!(result.scores.is_none());
        assert!(!result.review_available);

        let graded = attempt(AttemptStatus::Graded, 10.0, 20.0);
        let result = build_result(&student(), &graded, &exam, &[], &[]).unwrap();
        let scores = result.scores.unwrap();
        assert_eq!(scores.percentage, 50.0);
        assert!(!scores.passed);
        assert!(result.review_available);
    }

    #[test]
    fn review_includes_correct_answers_when_allowed() {
        let exam = exam("instructor-1", ExamStatus::Active);
        let attempt = attempt(AttemptStatus::Reviewed, 10.0, 10.0);
        let mut mc = question("q1", QuestionType::MultipleChoice, Some("B"), 10.0);
        mc.explanation = Some("B is the powerhouse".to_string());
        let now = datetime!(2025-01-02 10:00);
        let answer = Answer {
            id: "a1".to_string(),
            attempt_id: attempt.id.clone(),
            question_id: "q1".to_string(),
            answer: Some("B".to_string()),
            score: 10.0,
            max_score: Some(10.0),
            is_correct: true,
            auto_graded: true,
            graded_by: None,
            feedback: None,
            graded_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let result = build_result(&student(), &attempt, &exam, &[mc], &[answer]).unwrap();
        let review = result.review.unwrap();
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].correct_answer.as_deref(), Some("B"));
        assert_eq!(review[0].explanation.as_deref(), Some("B is the powerhouse"));
        assert!(review[0].is_correct);
        assert_eq!(review[0].score, Some(10.0));
    }

    #[test]
    fn strangers_are_rejected() {
        let exam = exam("instructor-1", ExamStatus::Active);
        let attempt = attempt(AttemptStatus::Graded, 1.0, 2.0);
        let other = Principal { id: "student-2".to_string(), role: UserRole::Student };
        assert!(matches!(
            build_result(&other, &attempt, &exam, &[], &[]),
            Err(LmsError::Forbidden(_))
        ));
    }
}
