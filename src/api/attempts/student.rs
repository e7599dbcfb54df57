use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::pagination::{self, PaginatedResponse};
use crate::api::validation::{client_ip, validate_payload};
use crate::core::state::AppState;
use crate::repositories;
use crate::schemas::attempt::{
    AnswerResponse, AnswerSubmit, AttemptListQuery, AttemptQuestionsResponse, AttemptResponse,
    MyAttemptResponse, ResultResponse, StartAttemptResponse,
};
use crate::schemas::question::StudentQuestionResponse;
use crate::services::access::can_manage_exam;
use crate::services::{attempt_tracker, grading, result_reporter};

pub(crate) async fn start_attempt(
    Path(exam_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<StartAttemptResponse>), ApiError> {
    let ip_address = client_ip(&headers);
    let started = attempt_tracker::start_attempt(
        state.db(),
        &principal,
        &exam_id,
        ip_address.as_deref(),
        state.settings().grading().lock_timeout_ms,
    )
    .await?;

    let status = if started.resumed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((
        status,
        Json(StartAttemptResponse {
            attempt: AttemptResponse::from(&started.attempt),
            resumed: started.resumed,
        }),
    ))
}

pub(super) async fn get_attempt_questions(
    Path(attempt_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<AttemptQuestionsResponse>, ApiError> {
    let (attempt, exam, questions) =
        attempt_tracker::attempt_questions(state.db(), &principal, &attempt_id).await?;

    Ok(Json(AttemptQuestionsResponse {
        attempt: AttemptResponse::from(&attempt),
        time_limit_minutes: exam.time_limit_minutes,
        questions: questions
            .into_iter()
            .enumerate()
            .map(|(index, question)| StudentQuestionResponse::from_question(question, index + 1))
            .collect(),
    }))
}

pub(super) async fn record_answer(
    Path((attempt_id, question_id)): Path<(String, String)>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<AnswerSubmit>,
) -> Result<Json<AnswerResponse>, ApiError> {
    validate_payload(&payload)?;

    let answer = attempt_tracker::record_answer(
        state.db(),
        &principal,
        &attempt_id,
        &question_id,
        payload.answer.as_deref(),
        state.settings().grading().lock_timeout_ms,
    )
    .await?;

    Ok(Json(AnswerResponse::from_answer(answer, false)))
}

pub(super) async fn list_attempt_answers(
    Path(attempt_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<AnswerResponse>>, ApiError> {
    let (_attempt, exam, answers) =
        attempt_tracker::list_answers(state.db(), &principal, &attempt_id).await?;
    let include_grading = can_manage_exam(&principal, &exam);

    Ok(Json(
        answers
            .into_iter()
            .map(|answer| AnswerResponse::from_answer(answer, include_grading))
            .collect(),
    ))
}

/// Closes the attempt and runs the grading pass, answering with the result
/// the student is allowed to see.
pub(super) async fn submit_attempt(
    Path(attempt_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ResultResponse>, ApiError> {
    let lock_timeout_ms = state.settings().grading().lock_timeout_ms;

    let attempt =
        attempt_tracker::submit_attempt(state.db(), &principal, &attempt_id, lock_timeout_ms)
            .await?;
    grading::grade_attempt(state.db(), &attempt.id, lock_timeout_ms).await?;

    let result = result_reporter::result_for(state.db(), &principal, &attempt.id).await?;
    Ok(Json(ResultResponse::from(result)))
}

pub(super) async fn get_result(
    Path(attempt_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ResultResponse>, ApiError> {
    let result = result_reporter::result_for(state.db(), &principal, &attempt_id).await?;
    Ok(Json(ResultResponse::from(result)))
}

pub(super) async fn list_my_attempts(
    Query(params): Query<AttemptListQuery>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<MyAttemptResponse>>, ApiError> {
    let (skip, limit) = pagination::window(state.settings(), params.skip, params.limit);

    let rows = repositories::attempts::list_by_student(
        state.db(),
        &principal.id,
        params.status,
        skip,
        limit,
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to list attempts"))?;
    let total_count =
        repositories::attempts::count_by_student(state.db(), &principal.id, params.status)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to count attempts"))?;

    Ok(Json(PaginatedResponse {
        items: rows.into_iter().map(MyAttemptResponse::from).collect(),
        total_count,
        skip,
        limit,
    }))
}
