use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::patch,
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentStaff, CurrentUser};
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::repositories;
use crate::schemas::exam::ExamQuestions;
use crate::schemas::question::{
    QuestionCreate, QuestionResponse, QuestionUpdate, StudentQuestionResponse,
};
use crate::services::access::{can_manage_exam, can_view_exam};
use crate::services::question_bank;

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/:question_id", patch(update_question).delete(delete_question))
}

pub(crate) async fn create_question(
    Path(exam_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
    Json(payload): Json<QuestionCreate>,
) -> Result<(StatusCode, Json<QuestionResponse>), ApiError> {
    validate_payload(&payload)?;
    let question =
        question_bank::add_question(state.db(), &principal, &exam_id, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(QuestionResponse::from(question))))
}

pub(crate) async fn list_questions(
    Path(exam_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamQuestions>, ApiError> {
    let exam = repositories::exams::find_by_id(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;
    if !can_view_exam(&principal, &exam) {
        return Err(ApiError::Forbidden("Access denied"));
    }

    let questions = question_bank::list_questions(state.db(), &exam.id).await?;
    if can_manage_exam(&principal, &exam) {
        return Ok(Json(ExamQuestions::Authoring(
            questions.into_iter().map(QuestionResponse::from).collect(),
        )));
    }

    Ok(Json(ExamQuestions::Student(
        questions
            .into_iter()
            .enumerate()
            .map(|(index, question)| StudentQuestionResponse::from_question(question, index + 1))
            .collect(),
    )))
}

async fn update_question(
    Path(question_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
    Json(payload): Json<QuestionUpdate>,
) -> Result<Json<QuestionResponse>, ApiError> {
    validate_payload(&payload)?;
    let question =
        question_bank::update_question(state.db(), &principal, &question_id, payload.into())
            .await?;
    Ok(Json(QuestionResponse::from(question)))
}

async fn delete_question(
    Path(question_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    question_bank::delete_question(state.db(), &principal, &question_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
