use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Question, QuestionOption};
use crate::db::types::QuestionType;
use crate::services::question_bank::{QuestionPatch, QuestionSpec};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[serde(alias = "questionText")]
    #[validate(length(min = 1, message = "question_text must not be empty"))]
    pub(crate) question_text: String,
    #[serde(alias = "questionType")]
    pub(crate) question_type: QuestionType,
    #[serde(default)]
    pub(crate) options: Vec<QuestionOption>,
    #[serde(default)]
    #[serde(alias = "correctAnswer")]
    pub(crate) correct_answer: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "points must be positive"))]
    pub(crate) points: f64,
    #[serde(default)]
    #[serde(alias = "orderNum")]
    #[validate(range(min = 0, message = "order_num must be non-negative"))]
    pub(crate) order_num: Option<i32>,
    #[serde(default)]
    pub(crate) explanation: Option<String>,
}

impl From<QuestionCreate> for QuestionSpec {
    fn from(payload: QuestionCreate) -> Self {
        Self {
            question_text: payload.question_text,
            question_type: payload.question_type,
            options: payload.options,
            correct_answer: payload.correct_answer,
            points: payload.points,
            order_num: payload.order_num,
            explanation: payload.explanation,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionUpdate {
    #[serde(default)]
    #[serde(alias = "questionText")]
    #[validate(length(min = 1, message = "question_text must not be empty"))]
    pub(crate) question_text: Option<String>,
    #[serde(default)]
    #[serde(alias = "questionType")]
    pub(crate) question_type: Option<QuestionType>,
    #[serde(default)]
    pub(crate) options: Option<Vec<QuestionOption>>,
    #[serde(default)]
    #[serde(alias = "correctAnswer")]
    pub(crate) correct_answer: Option<String>,
    #[serde(default)]
    #[validate(range(exclusive_min = 0.0, message = "points must be positive"))]
    pub(crate) points: Option<f64>,
    #[serde(default)]
    #[serde(alias = "orderNum")]
    #[validate(range(min = 0, message = "order_num must be non-negative"))]
    pub(crate) order_num: Option<i32>,
    #[serde(default)]
    pub(crate) explanation: Option<String>,
}

impl From<QuestionUpdate> for QuestionPatch {
    fn from(payload: QuestionUpdate) -> Self {
        Self {
            question_text: payload.question_text,
            question_type: payload.question_type,
            options: payload.options,
            correct_answer: payload.correct_answer,
            points: payload.points,
            order_num: payload.order_num,
            explanation: payload.explanation,
        }
    }
}

/// Authoring view, answer key included.
#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) correct_answer: Option<String>,
    pub(crate) points: f64,
    pub(crate) order_num: i32,
    pub(crate) explanation: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Question> for QuestionResponse {
    fn from(question: Question) -> Self {
        Self {
            id: question.id,
            exam_id: question.exam_id,
            question_text: question.question_text,
            question_type: question.question_type,
            options: question.options.0,
            correct_answer: question.correct_answer,
            points: question.points,
            order_num: question.order_num,
            explanation: question.explanation,
            created_at: format_primitive(question.created_at),
            updated_at: format_primitive(question.updated_at),
        }
    }
}

/// What a student sees while taking the exam.
#[derive(Debug, Serialize)]
pub(crate) struct StudentQuestionResponse {
    pub(crate) id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) points: f64,
    pub(crate) position: usize,
}

impl StudentQuestionResponse {
    pub(crate) fn from_question(question: Question, position: usize) -> Self {
        Self {
            id: question.id,
            question_text: question.question_text,
            question_type: question.question_type,
            options: question.options.0,
            points: question.points,
            position,
        }
    }
}
