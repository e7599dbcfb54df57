use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentStaff;
use crate::api::pagination::{self, PaginatedResponse};
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::repositories;
use crate::schemas::attempt::{
    AttemptListQuery, AttemptResponse, ExamAttemptResponse, GradedAttemptResponse,
    ManualGradeRequest,
};
use crate::services::access::ensure_exam_manager;
use crate::services::grading::{self, ManualGrade};

pub(crate) async fn list_exam_attempts(
    Path(exam_id): Path<String>,
    Query(params): Query<AttemptListQuery>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<ExamAttemptResponse>>, ApiError> {
    let exam = repositories::exams::find_by_id(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;
    ensure_exam_manager(&principal, &exam)?;

    let (skip, limit) = pagination::window(state.settings(), params.skip, params.limit);
    let rows = repositories::attempts::list_by_exam(state.db(), &exam.id, params.status, skip, limit)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list attempts"))?;
    let total_count = repositories::attempts::count_by_exam(state.db(), &exam.id, params.status)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count attempts"))?;

    Ok(Json(PaginatedResponse {
        items: rows.into_iter().map(ExamAttemptResponse::from).collect(),
        total_count,
        skip,
        limit,
    }))
}

pub(super) async fn regrade_attempt(
    Path(attempt_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<GradedAttemptResponse>, ApiError> {
    let graded = grading::regrade_attempt(
        state.db(),
        &principal,
        &attempt_id,
        state.settings().grading().lock_timeout_ms,
    )
    .await?;
    Ok(Json(GradedAttemptResponse::from(graded)))
}

pub(super) async fn grade_answer(
    Path(answer_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
    Json(payload): Json<ManualGradeRequest>,
) -> Result<Json<GradedAttemptResponse>, ApiError> {
    validate_payload(&payload)?;

    let graded = grading::record_manual_grade(
        state.db(),
        &principal,
        &answer_id,
        ManualGrade { score: payload.score, feedback: payload.feedback.as_deref() },
        state.settings().grading().lock_timeout_ms,
    )
    .await?;
    Ok(Json(GradedAttemptResponse::from(graded)))
}

pub(super) async fn review_attempt(
    Path(attempt_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = grading::mark_reviewed(
        state.db(),
        &principal,
        &attempt_id,
        state.settings().grading().lock_timeout_ms,
    )
    .await?;
    Ok(Json(AttemptResponse::from(&attempt)))
}
