use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Answer, Attempt, QuestionOption};
use crate::db::types::{AttemptStatus, QuestionType};
use crate::repositories::attempts::{ExamAttemptRow, StudentAttemptRow};
use crate::schemas::question::StudentQuestionResponse;
use crate::services::grading::GradedAttempt;
use crate::services::result_reporter::{self, AttemptResult, QuestionReview};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerSubmit {
    #[serde(default)]
    #[validate(length(max = 20000, message = "answer is too long"))]
    pub(crate) answer: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ManualGradeRequest {
    pub(crate) score: f64,
    #[serde(default)]
    #[validate(length(max = 5000, message = "feedback is too long"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttemptListQuery {
    #[serde(default)]
    pub(crate) skip: i64,
    #[serde(default)]
    pub(crate) limit: Option<i64>,
    #[serde(default)]
    pub(crate) status: Option<AttemptStatus>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) time_taken_seconds: Option<i64>,
}

impl From<&Attempt> for AttemptResponse {
    fn from(attempt: &Attempt) -> Self {
        Self {
            id: attempt.id.clone(),
            exam_id: attempt.exam_id.clone(),
            student_id: attempt.student_id.clone(),
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: format_primitive(attempt.started_at),
            submitted_at: attempt.submitted_at.map(format_primitive),
            time_taken_seconds: attempt.time_taken_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StartAttemptResponse {
    #[serde(flatten)]
    pub(crate) attempt: AttemptResponse,
    pub(crate) resumed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptQuestionsResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) questions: Vec<StudentQuestionResponse>,
}

/// An answer record. Grading fields are only filled for exam staff.
#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) id: String,
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) answer: Option<String>,
    pub(crate) updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) grading: Option<AnswerGrading>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerGrading {
    pub(crate) score: f64,
    pub(crate) max_score: Option<f64>,
    pub(crate) is_correct: bool,
    pub(crate) auto_graded: bool,
    pub(crate) graded_by: Option<String>,
    pub(crate) feedback: Option<String>,
    pub(crate) graded_at: Option<String>,
}

impl AnswerResponse {
    pub(crate) fn from_answer(answer: Answer, include_grading: bool) -> Self {
        let grading = include_grading.then(|| AnswerGrading {
            score: answer.score,
            max_score: answer.max_score,
            is_correct: answer.is_correct,
            auto_graded: answer.auto_graded,
            graded_by: answer.graded_by.clone(),
            feedback: answer.feedback.clone(),
            graded_at: answer.graded_at.map(format_primitive),
        });
        Self {
            id: answer.id,
            attempt_id: answer.attempt_id,
            question_id: answer.question_id,
            answer: answer.answer,
            updated_at: format_primitive(answer.updated_at),
            grading,
        }
    }
}

/// Staff view after a grading pass.
#[derive(Debug, Serialize)]
pub(crate) struct GradedAttemptResponse {
    #[serde(flatten)]
    pub(crate) attempt: AttemptResponse,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) pending_answers: usize,
    pub(crate) answers: Vec<AnswerResponse>,
}

impl From<GradedAttempt> for GradedAttemptResponse {
    fn from(graded: GradedAttempt) -> Self {
        Self {
            attempt: AttemptResponse::from(&graded.attempt),
            score: graded.attempt.score,
            max_score: graded.attempt.max_score,
            percentage: result_reporter::percentage(graded.attempt.score, graded.attempt.max_score),
            pending_answers: graded.pending,
            answers: graded
                .answers
                .into_iter()
                .map(|answer| AnswerResponse::from_answer(answer, true))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionReviewResponse {
    pub(crate) question_id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) your_answer: Option<String>,
    pub(crate) correct_answer: Option<String>,
    pub(crate) explanation: Option<String>,
    pub(crate) is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_score: Option<f64>,
    pub(crate) feedback: Option<String>,
    pub(crate) graded: bool,
}

impl From<QuestionReview> for QuestionReviewResponse {
    fn from(review: QuestionReview) -> Self {
        Self {
            question_id: review.question_id,
            question_text: review.question_text,
            question_type: review.question_type,
            options: review.options,
            your_answer: review.answer,
            correct_answer: review.correct_answer,
            explanation: review.explanation,
            is_correct: review.is_correct,
            score: review.score,
            max_score: review.max_score,
            feedback: review.feedback,
            graded: review.graded,
        }
    }
}

/// Policy-gated result. Score fields are omitted entirely when withheld.
#[derive(Debug, Serialize)]
pub(crate) struct ResultResponse {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) submitted_at: Option<String>,
    pub(crate) graded_at: Option<String>,
    pub(crate) time_taken_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) passed: Option<bool>,
    pub(crate) review_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) questions: Option<Vec<QuestionReviewResponse>>,
}

impl From<AttemptResult> for ResultResponse {
    fn from(result: AttemptResult) -> Self {
        let scores = result.scores;
        Self {
            attempt_id: result.attempt_id,
            exam_id: result.exam_id,
            student_id: result.student_id,
            status: result.status,
            submitted_at: result.submitted_at.map(format_primitive),
            graded_at: result.graded_at.map(format_primitive),
            time_taken_seconds: result.time_taken_seconds,
            score: scores.as_ref().map(|s| s.score),
            max_score: scores.as_ref().map(|s| s.max_score),
            percentage: scores.as_ref().map(|s| s.percentage),
            passed: scores.as_ref().map(|s| s.passed),
            review_available: result.review_available,
            questions: result
                .review
                .map(|entries| entries.into_iter().map(QuestionReviewResponse::from).collect()),
        }
    }
}

/// A row of the student's own attempt history.
#[derive(Debug, Serialize)]
pub(crate) struct MyAttemptResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) exam_title: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) passed: Option<bool>,
}

impl From<StudentAttemptRow> for MyAttemptResponse {
    fn from(row: StudentAttemptRow) -> Self {
        let visible = row.show_results && row.status.is_fully_graded();
        let percentage = result_reporter::percentage(row.score, row.max_score);
        Self {
            id: row.id,
            exam_id: row.exam_id,
            exam_title: row.exam_title,
            attempt_number: row.attempt_number,
            status: row.status,
            started_at: format_primitive(row.started_at),
            submitted_at: row.submitted_at.map(format_primitive),
            score: visible.then_some(row.score),
            max_score: visible.then_some(row.max_score),
            percentage: visible.then_some(percentage),
            passed: visible.then_some(percentage >= row.passing_score),
        }
    }
}

/// A row of the staff listing for one exam.
#[derive(Debug, Serialize)]
pub(crate) struct ExamAttemptResponse {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) student_username: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) time_taken_seconds: Option<i64>,
    pub(crate) pending_answers: i64,
}

impl From<ExamAttemptRow> for ExamAttemptResponse {
    fn from(row: ExamAttemptRow) -> Self {
        Self {
            percentage: result_reporter::percentage(row.score, row.max_score),
            id: row.id,
            student_id: row.student_id,
            student_username: row.student_username,
            attempt_number: row.attempt_number,
            status: row.status,
            started_at: format_primitive(row.started_at),
            submitted_at: row.submitted_at.map(format_primitive),
            score: row.score,
            max_score: row.max_score,
            time_taken_seconds: row.time_taken_seconds,
            pending_answers: row.pending_answers,
        }
    }
}
