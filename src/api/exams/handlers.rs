use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentStaff, CurrentUser};
use crate::api::pagination::{self, PaginatedResponse};
use crate::api::validation::validate_payload;
use crate::core::security::Principal;
use crate::core::state::AppState;
use crate::core::time::{primitive_now_utc, to_primitive_utc};
use crate::db::models::Exam;
use crate::db::types::{ExamStatus, UserRole};
use crate::repositories;
use crate::repositories::exams::ExamListFilter;
use crate::schemas::exam::{
    ExamCreate, ExamDetailResponse, ExamListQuery, ExamQuestions, ExamResponse, ExamStatusUpdate,
    ExamUpdate,
};
use crate::schemas::question::{QuestionResponse, StudentQuestionResponse};
use crate::services::access::{can_manage_exam, can_view_exam, ensure_exam_manager};
use crate::services::question_bank;

async fn load_exam(state: &AppState, exam_id: &str) -> Result<Exam, ApiError> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))
}

fn check_window(
    start: Option<PrimitiveDateTime>,
    end: Option<PrimitiveDateTime>,
) -> Result<(), ApiError> {
    match (start, end) {
        (Some(start), Some(end)) if end <= start => Err(ApiError::BadRequest(
            "availability_end must be after availability_start".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Window an exam ends up with after a PATCH: cleared, or new bounds merged over the stored ones.
fn updated_window(
    exam: &Exam,
    start: Option<PrimitiveDateTime>,
    end: Option<PrimitiveDateTime>,
    clear: bool,
) -> Result<(Option<PrimitiveDateTime>, Option<PrimitiveDateTime>), ApiError> {
    if clear {
        if start.is_some() || end.is_some() {
            return Err(ApiError::BadRequest(
                "clear_availability cannot be combined with new availability bounds".to_string(),
            ));
        }
        return Ok((None, None));
    }
    let window = (start.or(exam.availability_start), end.or(exam.availability_end));
    check_window(window.0, window.1)?;
    Ok(window)
}

pub(super) async fn create_exam(
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
    Json(payload): Json<ExamCreate>,
) -> Result<(StatusCode, Json<ExamResponse>), ApiError> {
    validate_payload(&payload)?;

    let availability_start = payload.availability_start.map(to_primitive_utc);
    let availability_end = payload.availability_end.map(to_primitive_utc);
    check_window(availability_start, availability_end)?;

    let passing_score =
        payload.passing_score.unwrap_or(state.settings().grading().default_passing_score);

    let exam = repositories::exams::create(
        state.db(),
        repositories::exams::CreateExam {
            id: &Uuid::new_v4().to_string(),
            title: payload.title.trim(),
            description: payload.description.as_deref(),
            subject: payload.subject.as_deref(),
            instructions: payload.instructions.as_deref(),
            instructor_id: &principal.id,
            time_limit_minutes: payload.time_limit_minutes,
            passing_score,
            max_attempts: payload.max_attempts,
            randomize_questions: payload.randomize_questions,
            randomize_options: payload.randomize_options,
            show_results: payload.show_results,
            allow_review: payload.allow_review,
            availability_start,
            availability_end,
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create exam"))?;

    tracing::info!(exam_id = %exam.id, instructor_id = %principal.id, "Exam created");
    Ok((StatusCode::CREATED, Json(ExamResponse::from(exam))))
}

/// Students see active exams, instructors their own, admins everything.
fn list_filter<'a>(principal: &'a Principal, status: Option<ExamStatus>) -> ExamListFilter<'a> {
    match principal.role {
        UserRole::Admin => ExamListFilter { status, instructor_id: None },
        UserRole::Instructor => ExamListFilter { status, instructor_id: Some(&principal.id) },
        UserRole::Student => ExamListFilter { status: Some(ExamStatus::Active), instructor_id: None },
    }
}

pub(super) async fn list_exams(
    Query(params): Query<ExamListQuery>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<ExamResponse>>, ApiError> {
    let (skip, limit) = pagination::window(state.settings(), params.skip, params.limit);

    if principal.role == UserRole::Student
        && params.status.is_some_and(|status| status != ExamStatus::Active)
    {
        return Ok(Json(PaginatedResponse { items: Vec::new(), total_count: 0, skip, limit }));
    }
    let filter = list_filter(&principal, params.status);

    let exams = repositories::exams::list(state.db(), &filter, skip, limit)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list exams"))?;
    let total_count = repositories::exams::count(state.db(), &filter)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count exams"))?;

    Ok(Json(PaginatedResponse {
        items: exams.into_iter().map(ExamResponse::from).collect(),
        total_count,
        skip,
        limit,
    }))
}

pub(super) async fn get_exam(
    Path(exam_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamDetailResponse>, ApiError> {
    let mut exam = load_exam(&state, &exam_id).await?;
    if !can_view_exam(&principal, &exam) {
        return Err(ApiError::Forbidden("Access denied"));
    }

    if exam.total_points_stale {
        exam.total_points = question_bank::ensure_totals(state.db(), &exam).await?;
        exam.total_points_stale = false;
    }

    let questions = question_bank::list_questions(state.db(), &exam.id).await?;
    let question_count = questions.len();
    let questions = if can_manage_exam(&principal, &exam) {
        ExamQuestions::Authoring(questions.into_iter().map(QuestionResponse::from).collect())
    } else {
        ExamQuestions::Student(
            questions
                .into_iter()
                .enumerate()
                .map(|(index, question)| StudentQuestionResponse::from_question(question, index + 1))
                .collect(),
        )
    };

    Ok(Json(ExamDetailResponse { exam: ExamResponse::from(exam), question_count, questions }))
}

pub(super) async fn update_exam(
    Path(exam_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
    Json(payload): Json<ExamUpdate>,
) -> Result<Json<ExamResponse>, ApiError> {
    validate_payload(&payload)?;

    let exam = load_exam(&state, &exam_id).await?;
    ensure_exam_manager(&principal, &exam)?;

    let availability_start = payload.availability_start.map(to_primitive_utc);
    let availability_end = payload.availability_end.map(to_primitive_utc);
    updated_window(&exam, availability_start, availability_end, payload.clear_availability)?;

    let updated = repositories::exams::update(
        state.db(),
        &exam.id,
        repositories::exams::UpdateExam {
            title: payload.title.map(|title| title.trim().to_string()),
            description: payload.description,
            subject: payload.subject,
            instructions: payload.instructions,
            time_limit_minutes: payload.time_limit_minutes,
            passing_score: payload.passing_score,
            max_attempts: payload.max_attempts,
            randomize_questions: payload.randomize_questions,
            randomize_options: payload.randomize_options,
            show_results: payload.show_results,
            allow_review: payload.allow_review,
            availability_start,
            availability_end,
            clear_availability: payload.clear_availability,
        },
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update exam"))?
    .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    tracing::info!(exam_id = %updated.id, "Exam updated");
    Ok(Json(ExamResponse::from(updated)))
}

pub(super) async fn delete_exam(
    Path(exam_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let exam = load_exam(&state, &exam_id).await?;
    ensure_exam_manager(&principal, &exam)?;

    let deleted = repositories::exams::delete_by_id(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete exam"))?;
    if !deleted {
        return Err(ApiError::NotFound("Exam not found".to_string()));
    }

    tracing::info!(exam_id = %exam.id, deleted_by = %principal.id, "Exam deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn change_status(
    Path(exam_id): Path<String>,
    CurrentStaff(principal): CurrentStaff,
    State(state): State<AppState>,
    Json(payload): Json<ExamStatusUpdate>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = load_exam(&state, &exam_id).await?;
    ensure_exam_manager(&principal, &exam)?;

    if !exam.status.can_transition_to(payload.status) {
        return Err(ApiError::Conflict(format!(
            "Cannot change exam status from {} to {}",
            exam.status.as_str(),
            payload.status.as_str()
        )));
    }

    if payload.status == ExamStatus::Active {
        let total_points = question_bank::ensure_totals(state.db(), &exam).await?;
        if total_points <= 0.0 {
            return Err(ApiError::Conflict("Exam has no questions".to_string()));
        }
    }

    let updated =
        repositories::exams::update_status(state.db(), &exam.id, payload.status, primitive_now_utc())
            .await
            .map_err(|e| ApiError::internal(e, "Failed to update exam status"))?
            .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    tracing::info!(
        exam_id = %updated.id,
        from = exam.status.as_str(),
        to = updated.status.as_str(),
        "Exam status changed"
    );
    Ok(Json(ExamResponse::from(updated)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::services::access::fixtures;

    fn principal(id: &str, role: UserRole) -> Principal {
        Principal { id: id.to_string(), role }
    }

    #[test]
    fn students_are_limited_to_active_exams() {
        let student = principal("s-1", UserRole::Student);
        let filter = list_filter(&student, None);
        assert_eq!(filter.status, Some(ExamStatus::Active));
        assert_eq!(filter.instructor_id, None);
    }

    #[test]
    fn instructors_list_their_own_exams() {
        let instructor = principal("i-1", UserRole::Instructor);
        let filter = list_filter(&instructor, Some(ExamStatus::Draft));
        assert_eq!(filter.status, Some(ExamStatus::Draft));
        assert_eq!(filter.instructor_id, Some("i-1"));

        let admin = principal("a-1", UserRole::Admin);
        assert_eq!(list_filter(&admin, None).instructor_id, None);
    }

    #[test]
    fn window_must_be_ordered() {
        let start = time::macros::datetime!(2025-03-01 09:00);
        let end = time::macros::datetime!(2025-03-01 11:00);
        assert!(check_window(Some(start), Some(end)).is_ok());
        assert!(check_window(Some(end), Some(start)).is_err());
        assert!(check_window(Some(start), None).is_ok());
    }

    #[test]
    fn patch_can_clear_or_merge_the_window() {
        let start = time::macros::datetime!(2025-03-01 09:00);
        let end = time::macros::datetime!(2025-03-01 11:00);
        let mut exam = fixtures::exam("i-1", ExamStatus::Draft);
        exam.availability_start = Some(start);
        exam.availability_end = Some(end);

        assert_eq!(updated_window(&exam, None, None, true).unwrap(), (None, None));
        assert!(updated_window(&exam, Some(start), None, true).is_err());
        assert_eq!(updated_window(&exam, None, None, false).unwrap(), (Some(start), Some(end)));

        let later = time::macros::datetime!(2025-03-01 12:00);
        assert!(updated_window(&exam, Some(later), None, false).is_err());
        assert_eq!(
            updated_window(&exam, None, Some(later), false).unwrap(),
            (Some(start), Some(later))
        );
    }
}
