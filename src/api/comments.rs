use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::pagination::{self, PaginatedResponse};
use crate::api::validation::validate_payload;
use crate::core::security::Principal;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Comment, Exam};
use crate::repositories;
use crate::schemas::comment::{CommentCreate, CommentListQuery, CommentResolve, CommentResponse};
use crate::services::access::{can_view_exam, ensure_exam_manager};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:comment_id", delete(delete_comment))
        .route("/:comment_id/replies", get(list_replies))
        .route("/:comment_id/resolve", post(resolve_comment))
}

async fn load_visible_exam(
    state: &AppState,
    principal: &Principal,
    exam_id: &str,
) -> Result<Exam, ApiError> {
    let exam = repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;
    if !can_view_exam(principal, &exam) {
        return Err(ApiError::Forbidden("Access denied"));
    }
    Ok(exam)
}

async fn load_comment(state: &AppState, comment_id: &str) -> Result<Comment, ApiError> {
    repositories::comments::find_by_id(state.db(), comment_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch comment"))?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))
}

pub(crate) async fn list_comments(
    Path(exam_id): Path<String>,
    Query(params): Query<CommentListQuery>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<CommentResponse>>, ApiError> {
    let exam = load_visible_exam(&state, &principal, &exam_id).await?;
    let (skip, limit) = pagination::window(state.settings(), params.skip, params.limit);

    let rows = repositories::comments::list_top_level(state.db(), &exam.id, skip, limit)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list comments"))?;
    let total_count = repositories::comments::count_top_level(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count comments"))?;

    Ok(Json(PaginatedResponse {
        items: rows.into_iter().map(CommentResponse::from).collect(),
        total_count,
        skip,
        limit,
    }))
}

pub(crate) async fn create_comment(
    Path(exam_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentCreate>,
) -> Result<(StatusCode, Json<CommentResponse>), ApiError> {
    validate_payload(&payload)?;
    let exam = load_visible_exam(&state, &principal, &exam_id).await?;

    if let Some(parent_id) = payload.parent_id.as_deref() {
        let parent = load_comment(&state, parent_id).await?;
        if parent.exam_id != exam.id {
            return Err(ApiError::BadRequest(
                "Parent comment belongs to a different exam".to_string(),
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    repositories::comments::create(
        state.db(),
        repositories::comments::CreateComment {
            id: &id,
            exam_id: &exam.id,
            user_id: &principal.id,
            comment_text: payload.comment_text.trim(),
            parent_id: payload.parent_id.as_deref(),
            created_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create comment"))?;

    let row = repositories::comments::find_row_by_id(state.db(), &id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch comment"))?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    tracing::info!(comment_id = %id, exam_id = %exam.id, "Comment created");
    Ok((StatusCode::CREATED, Json(CommentResponse::from(row))))
}

async fn list_replies(
    Path(comment_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CommentResponse>>, ApiError> {
    let parent = load_comment(&state, &comment_id).await?;
    load_visible_exam(&state, &principal, &parent.exam_id).await?;

    let rows = repositories::comments::list_replies(state.db(), &parent.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list replies"))?;

    Ok(Json(rows.into_iter().map(CommentResponse::from).collect()))
}

async fn resolve_comment(
    Path(comment_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentResolve>,
) -> Result<Json<CommentResponse>, ApiError> {
    let comment = load_comment(&state, &comment_id).await?;
    let exam = repositories::exams::find_by_id(state.db(), &comment.exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;
    ensure_exam_manager(&principal, &exam)?;

    repositories::comments::set_resolved(
        state.db(),
        &comment.id,
        payload.is_resolved,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update comment"))?;

    let row = repositories::comments::find_row_by_id(state.db(), &comment.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch comment"))?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    Ok(Json(CommentResponse::from(row)))
}

async fn delete_comment(
    Path(comment_id): Path<String>,
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let comment = load_comment(&state, &comment_id).await?;
    if comment.user_id != principal.id && !principal.is_admin() {
        return Err(ApiError::Forbidden("Only the author or an admin can delete a comment"));
    }

    repositories::comments::delete_by_id(state.db(), &comment.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete comment"))?;

    tracing::info!(comment_id = %comment.id, deleted_by = %principal.id, "Comment deleted");
    Ok(StatusCode::NO_CONTENT)
}
